//! Mach-O image handle for a binary mapped in a target task.

use tracing::debug;
use zerocopy::{FromBytes, IntoBytes};

use crate::error::{Error, Result};
use crate::image::section::SectionMap;
use crate::image::structs::*;
use crate::image::task::{ByteOrder, TaskMemory};

/// A Mach-O image mapped in a target task's address space.
///
/// The handle carries everything the metadata parser needs to read the
/// image safely: the task to copy from, the byte-order descriptor derived
/// from the Mach magic, the pointer width, and the CPU type (which decides
/// whether `isa` pointers carry ARM64 tag bits).
///
/// Construction performs a handful of bounded task copies to discover the
/// header; it does not allocate beyond the name and holds no open
/// resources, so a handle can be built per-image ahead of a crash and
/// reused from the handler.
pub struct MachImage<'t> {
    task: &'t dyn TaskMemory,
    base: u64,
    byteorder: ByteOrder,
    m64: bool,
    cputype: u32,
    ncmds: u32,
    name: String,
}

impl<'t> MachImage<'t> {
    /// Discovers the Mach-O image at `base` in `task`.
    ///
    /// Fails with [`Error::Invalid`] when the magic is not a Mach-O magic,
    /// and with [`Error::Access`] when the header cannot be read at all.
    pub fn new(task: &'t dyn TaskMemory, base: u64, name: &str) -> Result<Self> {
        let mut magic_bytes = [0u8; 4];
        task.copy(base, &mut magic_bytes)?;
        let magic = u32::from_ne_bytes(magic_bytes);

        let (m64, byteorder) = match magic {
            MH_MAGIC_64 => (true, ByteOrder::native()),
            MH_CIGAM_64 => (true, ByteOrder::swapped()),
            MH_MAGIC => (false, ByteOrder::native()),
            MH_CIGAM => (false, ByteOrder::swapped()),
            _ => {
                debug!("bad Mach-O magic {magic:#x} at {base:#x}");
                return Err(Error::invalid(base));
            }
        };

        let mut image = MachImage {
            task,
            base,
            byteorder,
            m64,
            cputype: 0,
            ncmds: 0,
            name: name.to_string(),
        };

        if m64 {
            let header: MachHeader64 = image.copy_object(base)?;
            image.cputype = byteorder.swap32(header.cputype);
            image.ncmds = byteorder.swap32(header.ncmds);
        } else {
            let header: MachHeader32 = image.copy_object(base)?;
            image.cputype = byteorder.swap32(header.cputype);
            image.ncmds = byteorder.swap32(header.ncmds);
        }

        Ok(image)
    }

    /// Returns the task this image is mapped in.
    #[inline]
    pub fn task(&self) -> &'t dyn TaskMemory {
        self.task
    }

    /// Returns the image's base (header) address in the target.
    #[inline]
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Returns the image's byte-order descriptor.
    #[inline]
    pub fn byteorder(&self) -> ByteOrder {
        self.byteorder
    }

    /// Returns true if the image uses 64-bit pointers.
    #[inline]
    pub fn m64(&self) -> bool {
        self.m64
    }

    /// Returns true if the image targets ARM64 (including arm64e).
    #[inline]
    pub fn is_arm64(&self) -> bool {
        self.cputype == CPU_TYPE_ARM64
    }

    /// Returns the image name, for diagnostics.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copies a structure out of the target task at `addr`.
    ///
    /// The destination is a zero-initialized stack value; no heap is
    /// involved. Fields are returned exactly as they appear in the target
    /// and still require [`ByteOrder`] swapping.
    pub fn copy_object<T: FromBytes + IntoBytes>(&self, addr: u64) -> Result<T> {
        let mut value = T::new_zeroed();
        self.task.copy(addr, value.as_mut_bytes())?;
        Ok(value)
    }

    /// Maps the named section into a local [`SectionMap`] window.
    ///
    /// Walks the image's load commands in the target, locates
    /// `segment,section`, and copies its byte range locally. Returns
    /// [`Error::NotFound`] when the image has no such section.
    pub fn map_section(&self, segment: &str, section: &str) -> Result<SectionMap> {
        let bo = self.byteorder;
        let header_size = if self.m64 {
            MachHeader64::SIZE
        } else {
            MachHeader32::SIZE
        };

        // Every cursor step below is driven by counts and sizes read out of
        // the (possibly corrupted) target, so the address arithmetic must
        // not be allowed to wrap.
        let mut cursor = self
            .base
            .checked_add(header_size as u64)
            .ok_or(Error::Invalid { addr: self.base })?;
        for _ in 0..self.ncmds {
            let lc: LoadCommand = self.copy_object(cursor)?;
            let cmd = bo.swap32(lc.cmd);
            let cmdsize = bo.swap32(lc.cmdsize) as u64;
            // A command smaller than its own header would stall the cursor.
            if cmdsize < LoadCommand::SIZE as u64 {
                debug!("load command at {cursor:#x} has impossible size {cmdsize}");
                return Err(Error::invalid(cursor));
            }

            if self.m64 && cmd == LC_SEGMENT_64 {
                let seg: SegmentCommand64 = self.copy_object(cursor)?;
                if name_matches(&seg.segname, segment) {
                    let mut sect_addr = cursor
                        .checked_add(SegmentCommand64::SIZE as u64)
                        .ok_or_else(|| Error::invalid(cursor))?;
                    for _ in 0..bo.swap32(seg.nsects) {
                        let sect: Section64 = self.copy_object(sect_addr)?;
                        if name_matches(&sect.sectname, section) {
                            return SectionMap::acquire(
                                self,
                                bo.swap64(sect.addr),
                                bo.swap64(sect.size),
                            );
                        }
                        sect_addr = sect_addr
                            .checked_add(Section64::SIZE as u64)
                            .ok_or_else(|| Error::invalid(sect_addr))?;
                    }
                }
            } else if !self.m64 && cmd == LC_SEGMENT {
                let seg: SegmentCommand32 = self.copy_object(cursor)?;
                if name_matches(&seg.segname, segment) {
                    let mut sect_addr = cursor
                        .checked_add(SegmentCommand32::SIZE as u64)
                        .ok_or_else(|| Error::invalid(cursor))?;
                    for _ in 0..bo.swap32(seg.nsects) {
                        let sect: Section32 = self.copy_object(sect_addr)?;
                        if name_matches(&sect.sectname, section) {
                            return SectionMap::acquire(
                                self,
                                bo.swap32(sect.addr) as u64,
                                bo.swap32(sect.size) as u64,
                            );
                        }
                        sect_addr = sect_addr
                            .checked_add(Section32::SIZE as u64)
                            .ok_or_else(|| Error::invalid(sect_addr))?;
                    }
                }
            }

            cursor = cursor
                .checked_add(cmdsize)
                .ok_or_else(|| Error::invalid(cursor))?;
        }

        Err(Error::NotFound)
    }
}

impl core::fmt::Debug for MachImage<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MachImage")
            .field("name", &self.name)
            .field("base", &format_args!("{:#x}", self.base))
            .field("m64", &self.m64)
            .field("cputype", &format_args!("{:#x}", self.cputype))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{FakeImageBuilder, FakeTask};

    #[test]
    fn test_discover_64bit_image() {
        let mut task = FakeTask::new();
        FakeImageBuilder::new64(0x100000000, CPU_TYPE_ARM64)
            .section("__DATA", "__objc_const", 0x100004000, 0x40)
            .build(&mut task);
        task.fill(0x100004000, 0x40, 0xCC);

        let image = MachImage::new(&task, 0x100000000, "test").unwrap();
        assert!(image.m64());
        assert!(image.is_arm64());
        assert!(!image.byteorder().is_swapped());
        assert_eq!(image.base(), 0x100000000);
    }

    #[test]
    fn test_discover_32bit_image() {
        let mut task = FakeTask::new();
        FakeImageBuilder::new32(0x1000, CPU_TYPE_X86)
            .section("__OBJC", "__module_info", 0x4000, 0x10)
            .build(&mut task);
        task.fill(0x4000, 0x10, 0);

        let image = MachImage::new(&task, 0x1000, "legacy").unwrap();
        assert!(!image.m64());
        assert!(!image.is_arm64());
    }

    #[test]
    fn test_map_section_copies_contents() {
        let mut task = FakeTask::new();
        FakeImageBuilder::new64(0x100000000, CPU_TYPE_X86_64)
            .section("__DATA", "__objc_data", 0x100008000, 8)
            .build(&mut task);
        task.alloc(0x100008000, 8);
        task.write(0x100008000, &[9, 8, 7, 6, 5, 4, 3, 2]);

        let image = MachImage::new(&task, 0x100000000, "test").unwrap();
        let map = image.map_section("__DATA", "__objc_data").unwrap();
        assert_eq!(map.base_addr(), 0x100008000);
        assert_eq!(map.bytes(), &[9, 8, 7, 6, 5, 4, 3, 2]);
    }

    #[test]
    fn test_map_section_missing_is_not_found() {
        let mut task = FakeTask::new();
        FakeImageBuilder::new64(0x100000000, CPU_TYPE_X86_64)
            .section("__TEXT", "__text", 0x100001000, 4)
            .build(&mut task);
        task.fill(0x100001000, 4, 0x90);

        let image = MachImage::new(&task, 0x100000000, "test").unwrap();
        assert_eq!(
            image.map_section("__DATA", "__objc_const").unwrap_err(),
            Error::NotFound
        );
        // Right segment, wrong section.
        assert_eq!(
            image.map_section("__TEXT", "__stubs").unwrap_err(),
            Error::NotFound
        );
    }

    #[test]
    fn test_huge_cmdsize_near_address_space_end_is_invalid() {
        // A corrupted cmdsize high in the address space must surface as
        // Invalid, not wrap the cursor.
        let base = u64::MAX - 0x10000;
        let mut task = FakeTask::new();
        task.alloc(base, 0x1000);
        let header = MachHeader64 {
            magic: MH_MAGIC_64,
            cputype: CPU_TYPE_X86_64,
            cpusubtype: 0,
            filetype: 0x6,
            ncmds: 1,
            sizeofcmds: LoadCommand::SIZE as u32,
            flags: 0,
            reserved: 0,
        };
        task.write(base, header.as_bytes());
        task.write(
            base + MachHeader64::SIZE as u64,
            LoadCommand {
                cmd: 0x99,
                cmdsize: 0xFFFF_FFF0,
            }
            .as_bytes(),
        );

        let image = MachImage::new(&task, base, "corrupt").unwrap();
        assert!(matches!(
            image.map_section("__DATA", "__objc_const"),
            Err(Error::Invalid { .. })
        ));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut task = FakeTask::new();
        task.alloc(0x1000, 0x100);
        task.write(0x1000, &0xDEADBEEFu32.to_ne_bytes());
        assert_eq!(
            MachImage::new(&task, 0x1000, "junk").unwrap_err(),
            Error::invalid(0x1000)
        );
    }

    #[test]
    fn test_unreadable_header_is_access() {
        let task = FakeTask::new();
        assert_eq!(
            MachImage::new(&task, 0x1000, "gone").unwrap_err(),
            Error::access(0x1000)
        );
    }
}
