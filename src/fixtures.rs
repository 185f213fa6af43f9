//! Test fixtures: fake tasks and fabricated Mach-O images.
//!
//! The parser's tests never run against a live process; instead they build
//! miniature Mach-O images inside a [`FakeTask`], a sparse address space
//! backed by plain byte vectors. Reads that stray outside a region fail
//! with `Access`, which is exactly how an unmapped page behaves in a real
//! target.

use zerocopy::IntoBytes;

use crate::error::{Error, Result};
use crate::image::structs::*;
use crate::image::TaskMemory;

/// A sparse fake address space.
pub(crate) struct FakeTask {
    regions: Vec<(u64, Vec<u8>)>,
}

impl FakeTask {
    pub fn new() -> Self {
        FakeTask {
            regions: Vec::new(),
        }
    }

    /// Maps a zero-filled region at `base`.
    pub fn alloc(&mut self, base: u64, len: usize) {
        self.regions.push((base, vec![0u8; len]));
    }

    /// Maps a region at `addr` filled with `byte`.
    pub fn fill(&mut self, addr: u64, len: usize, byte: u8) {
        self.regions.push((addr, vec![byte; len]));
    }

    /// Writes bytes into an existing region.
    ///
    /// Panics when the range is not covered by a single mapped region, so
    /// fixture layout mistakes surface as test failures rather than silent
    /// gaps.
    pub fn write(&mut self, addr: u64, bytes: &[u8]) {
        for (base, data) in &mut self.regions {
            let end = *base + data.len() as u64;
            if addr >= *base && addr + bytes.len() as u64 <= end {
                let offset = (addr - *base) as usize;
                data[offset..offset + bytes.len()].copy_from_slice(bytes);
                return;
            }
        }
        panic!("fixture write outside any region: {addr:#x}");
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) {
        self.write(addr, &value.to_ne_bytes());
    }
}

impl TaskMemory for FakeTask {
    fn copy(&self, addr: u64, dst: &mut [u8]) -> Result<()> {
        for (base, data) in &self.regions {
            let end = *base + data.len() as u64;
            if addr >= *base && addr + dst.len() as u64 <= end {
                let offset = (addr - *base) as usize;
                dst.copy_from_slice(&data[offset..offset + dst.len()]);
                return Ok(());
            }
        }
        Err(Error::access(addr))
    }
}

/// Builds a minimal Mach-O image inside a [`FakeTask`].
///
/// Each named section gets its own single-section segment command; the
/// builder maps only the header region, and tests map and populate the
/// section contents themselves.
pub(crate) struct FakeImageBuilder {
    base: u64,
    m64: bool,
    cputype: u32,
    sections: Vec<([u8; 16], [u8; 16], u64, u64)>,
}

impl FakeImageBuilder {
    pub fn new64(base: u64, cputype: u32) -> Self {
        FakeImageBuilder {
            base,
            m64: true,
            cputype,
            sections: Vec::new(),
        }
    }

    pub fn new32(base: u64, cputype: u32) -> Self {
        FakeImageBuilder {
            base,
            m64: false,
            cputype,
            sections: Vec::new(),
        }
    }

    pub fn section(mut self, segment: &str, section: &str, addr: u64, size: u64) -> Self {
        self.sections
            .push((pad_name(segment), pad_name(section), addr, size));
        self
    }

    pub fn build(self, task: &mut FakeTask) {
        if self.m64 {
            self.build64(task)
        } else {
            self.build32(task)
        }
    }

    fn build64(self, task: &mut FakeTask) {
        let cmdsize = SegmentCommand64::SIZE + Section64::SIZE;
        let sizeofcmds = cmdsize * self.sections.len();
        let header = MachHeader64 {
            magic: MH_MAGIC_64,
            cputype: self.cputype,
            cpusubtype: 0,
            filetype: 0x6, // MH_DYLIB
            ncmds: self.sections.len() as u32,
            sizeofcmds: sizeofcmds as u32,
            flags: 0,
            reserved: 0,
        };
        task.alloc(self.base, MachHeader64::SIZE + sizeofcmds);
        task.write(self.base, header.as_bytes());

        let mut cursor = self.base + MachHeader64::SIZE as u64;
        for (segname, sectname, addr, size) in &self.sections {
            let seg = SegmentCommand64 {
                cmdsize: cmdsize as u32,
                segname: *segname,
                vmaddr: *addr,
                vmsize: *size,
                nsects: 1,
                ..Default::default()
            };
            let sect = Section64 {
                sectname: *sectname,
                segname: *segname,
                addr: *addr,
                size: *size,
                ..Default::default()
            };
            task.write(cursor, seg.as_bytes());
            task.write(cursor + SegmentCommand64::SIZE as u64, sect.as_bytes());
            cursor += cmdsize as u64;
        }
    }

    fn build32(self, task: &mut FakeTask) {
        let cmdsize = SegmentCommand32::SIZE + Section32::SIZE;
        let sizeofcmds = cmdsize * self.sections.len();
        let header = MachHeader32 {
            magic: MH_MAGIC,
            cputype: self.cputype,
            cpusubtype: 0,
            filetype: 0x6,
            ncmds: self.sections.len() as u32,
            sizeofcmds: sizeofcmds as u32,
            flags: 0,
        };
        task.alloc(self.base, MachHeader32::SIZE + sizeofcmds);
        task.write(self.base, header.as_bytes());

        let mut cursor = self.base + MachHeader32::SIZE as u64;
        for (segname, sectname, addr, size) in &self.sections {
            let seg = SegmentCommand32 {
                cmdsize: cmdsize as u32,
                segname: *segname,
                vmaddr: *addr as u32,
                vmsize: *size as u32,
                nsects: 1,
                ..Default::default()
            };
            let sect = Section32 {
                sectname: *sectname,
                segname: *segname,
                addr: *addr as u32,
                size: *size as u32,
                ..Default::default()
            };
            task.write(cursor, seg.as_bytes());
            task.write(cursor + SegmentCommand32::SIZE as u64, sect.as_bytes());
            cursor += cmdsize as u64;
        }
    }
}
