//! Mach-O binary structures and constants.
//!
//! These structures match the on-disk format of Mach-O files, in both the
//! 32- and 64-bit widths. Objective-C 1 metadata only ever appears in
//! 32-bit images, so unlike most modern tooling the parser cannot assume
//! the 64-bit layouts.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

// =============================================================================
// Magic Numbers
// =============================================================================

/// 32-bit Mach-O magic (host byte order).
pub const MH_MAGIC: u32 = 0xFEEDFACE;

/// 32-bit Mach-O magic (reversed byte order).
pub const MH_CIGAM: u32 = 0xCEFAEDFE;

/// 64-bit Mach-O magic (host byte order).
pub const MH_MAGIC_64: u32 = 0xFEEDFACF;

/// 64-bit Mach-O magic (reversed byte order).
pub const MH_CIGAM_64: u32 = 0xCFFAEDFE;

// =============================================================================
// Load Command Types
// =============================================================================

/// 32-bit segment load command.
pub const LC_SEGMENT: u32 = 0x1;

/// 64-bit segment load command.
pub const LC_SEGMENT_64: u32 = 0x19;

// =============================================================================
// CPU Types
// =============================================================================

/// 64-bit architecture flag.
pub const CPU_ARCH_ABI64: u32 = 0x0100_0000;

/// ARM CPU type.
pub const CPU_TYPE_ARM: u32 = 12;

/// ARM64 CPU type.
pub const CPU_TYPE_ARM64: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64;

/// x86 CPU type.
pub const CPU_TYPE_X86: u32 = 7;

/// x86_64 CPU type.
pub const CPU_TYPE_X86_64: u32 = CPU_TYPE_X86 | CPU_ARCH_ABI64;

// =============================================================================
// Header Structures
// =============================================================================

/// 32-bit Mach-O header.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct MachHeader32 {
    /// Magic number (MH_MAGIC or MH_CIGAM)
    pub magic: u32,
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File type
    pub filetype: u32,
    /// Number of load commands
    pub ncmds: u32,
    /// Size of load commands
    pub sizeofcmds: u32,
    /// Flags
    pub flags: u32,
}

impl MachHeader32 {
    /// Size of the header in bytes.
    pub const SIZE: usize = 28;
}

/// 64-bit Mach-O header.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct MachHeader64 {
    /// Magic number (MH_MAGIC_64 or MH_CIGAM_64)
    pub magic: u32,
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File type
    pub filetype: u32,
    /// Number of load commands
    pub ncmds: u32,
    /// Size of load commands
    pub sizeofcmds: u32,
    /// Flags
    pub flags: u32,
    /// Reserved
    pub reserved: u32,
}

impl MachHeader64 {
    /// Size of the header in bytes.
    pub const SIZE: usize = 32;
}

// =============================================================================
// Load Command Header
// =============================================================================

/// Generic load command header.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct LoadCommand {
    /// Type of load command
    pub cmd: u32,
    /// Size of load command
    pub cmdsize: u32,
}

impl LoadCommand {
    /// Size of the load command header.
    pub const SIZE: usize = 8;
}

// =============================================================================
// Segment Commands
// =============================================================================

/// 32-bit segment command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SegmentCommand32 {
    /// LC_SEGMENT
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Virtual memory address
    pub vmaddr: u32,
    /// Virtual memory size
    pub vmsize: u32,
    /// File offset
    pub fileoff: u32,
    /// Amount of file to map
    pub filesize: u32,
    /// Maximum VM protection
    pub maxprot: u32,
    /// Initial VM protection
    pub initprot: u32,
    /// Number of sections
    pub nsects: u32,
    /// Flags
    pub flags: u32,
}

impl SegmentCommand32 {
    /// Size of the segment command (without sections).
    pub const SIZE: usize = 56;

    /// Sets the segment name from a string.
    pub fn set_name(&mut self, name: &str) {
        self.segname = pad_name(name);
    }
}

impl Default for SegmentCommand32 {
    fn default() -> Self {
        Self {
            cmd: LC_SEGMENT,
            cmdsize: Self::SIZE as u32,
            segname: [0u8; 16],
            vmaddr: 0,
            vmsize: 0,
            fileoff: 0,
            filesize: 0,
            maxprot: 0,
            initprot: 0,
            nsects: 0,
            flags: 0,
        }
    }
}

/// 64-bit segment command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SegmentCommand64 {
    /// LC_SEGMENT_64
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Virtual memory address
    pub vmaddr: u64,
    /// Virtual memory size
    pub vmsize: u64,
    /// File offset
    pub fileoff: u64,
    /// Amount of file to map
    pub filesize: u64,
    /// Maximum VM protection
    pub maxprot: u32,
    /// Initial VM protection
    pub initprot: u32,
    /// Number of sections
    pub nsects: u32,
    /// Flags
    pub flags: u32,
}

impl SegmentCommand64 {
    /// Size of the segment command (without sections).
    pub const SIZE: usize = 72;

    /// Sets the segment name from a string.
    pub fn set_name(&mut self, name: &str) {
        self.segname = pad_name(name);
    }
}

impl Default for SegmentCommand64 {
    fn default() -> Self {
        Self {
            cmd: LC_SEGMENT_64,
            cmdsize: Self::SIZE as u32,
            segname: [0u8; 16],
            vmaddr: 0,
            vmsize: 0,
            fileoff: 0,
            filesize: 0,
            maxprot: 0,
            initprot: 0,
            nsects: 0,
            flags: 0,
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

/// 32-bit section.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Section32 {
    /// Section name (16 bytes, null-padded)
    pub sectname: [u8; 16],
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Virtual memory address
    pub addr: u32,
    /// Size in bytes
    pub size: u32,
    /// File offset
    pub offset: u32,
    /// Alignment (power of 2)
    pub align: u32,
    /// File offset of relocation entries
    pub reloff: u32,
    /// Number of relocation entries
    pub nreloc: u32,
    /// Flags
    pub flags: u32,
    /// Reserved (for runtime use)
    pub reserved1: u32,
    /// Reserved (for runtime use)
    pub reserved2: u32,
}

impl Section32 {
    /// Size of a section entry.
    pub const SIZE: usize = 68;

    /// Sets the section name from a string.
    pub fn set_name(&mut self, name: &str) {
        self.sectname = pad_name(name);
    }
}

impl Default for Section32 {
    fn default() -> Self {
        Self {
            sectname: [0u8; 16],
            segname: [0u8; 16],
            addr: 0,
            size: 0,
            offset: 0,
            align: 0,
            reloff: 0,
            nreloc: 0,
            flags: 0,
            reserved1: 0,
            reserved2: 0,
        }
    }
}

/// 64-bit section.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Section64 {
    /// Section name (16 bytes, null-padded)
    pub sectname: [u8; 16],
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Virtual memory address
    pub addr: u64,
    /// Size in bytes
    pub size: u64,
    /// File offset
    pub offset: u32,
    /// Alignment (power of 2)
    pub align: u32,
    /// File offset of relocation entries
    pub reloff: u32,
    /// Number of relocation entries
    pub nreloc: u32,
    /// Flags
    pub flags: u32,
    /// Reserved (for runtime use)
    pub reserved1: u32,
    /// Reserved (for runtime use)
    pub reserved2: u32,
    /// Reserved
    pub reserved3: u32,
}

impl Section64 {
    /// Size of a section entry.
    pub const SIZE: usize = 80;

    /// Sets the section name from a string.
    pub fn set_name(&mut self, name: &str) {
        self.sectname = pad_name(name);
    }
}

impl Default for Section64 {
    fn default() -> Self {
        Self {
            sectname: [0u8; 16],
            segname: [0u8; 16],
            addr: 0,
            size: 0,
            offset: 0,
            align: 0,
            reloff: 0,
            nreloc: 0,
            flags: 0,
            reserved1: 0,
            reserved2: 0,
            reserved3: 0,
        }
    }
}

// =============================================================================
// Name Handling
// =============================================================================

/// Compares a 16-byte padded segment/section name field against a string.
///
/// Names shorter than 16 bytes are NUL-padded; names at exactly 16 bytes
/// (e.g. `__objc_classlist`) carry no terminator, so a plain C string
/// comparison would misbehave.
#[inline]
pub fn name_matches(field: &[u8; 16], name: &str) -> bool {
    *field == pad_name(name)
}

/// NUL-pads a segment/section name to the fixed 16-byte field width.
/// Names longer than 16 bytes are truncated.
#[inline]
pub fn pad_name(name: &str) -> [u8; 16] {
    let mut field = [0u8; 16];
    let bytes = name.as_bytes();
    let len = bytes.len().min(16);
    field[..len].copy_from_slice(&bytes[..len]);
    field
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::size_of;

    #[test]
    fn test_struct_sizes() {
        assert_eq!(size_of::<MachHeader32>(), MachHeader32::SIZE);
        assert_eq!(size_of::<MachHeader64>(), MachHeader64::SIZE);
        assert_eq!(size_of::<LoadCommand>(), LoadCommand::SIZE);
        assert_eq!(size_of::<SegmentCommand32>(), SegmentCommand32::SIZE);
        assert_eq!(size_of::<SegmentCommand64>(), SegmentCommand64::SIZE);
        assert_eq!(size_of::<Section32>(), Section32::SIZE);
        assert_eq!(size_of::<Section64>(), Section64::SIZE);
    }

    #[test]
    fn test_name_matches() {
        assert!(name_matches(&pad_name("__DATA"), "__DATA"));
        assert!(!name_matches(&pad_name("__DATA"), "__DATA_CONST"));
        // Full-width name with no NUL terminator.
        assert!(name_matches(&pad_name("__objc_classlist"), "__objc_classlist"));
        assert!(!name_matches(&pad_name("__objc_classlist"), "__objc_catlist"));
    }
}
