//! Local windows onto target-process sections.

use memmap2::MmapMut;
use tracing::warn;
use zerocopy::FromBytes;

use crate::error::{Error, Result};
use crate::image::MachImage;

/// A local, read-only view of a byte range in the target's address space.
///
/// The window is backed by an anonymous page mapping filled with a single
/// bounded copy at acquisition time; the heap is never involved. Every
/// interior pointer the parser follows is validated by [`remap`]ing it
/// through a window known to cover it, which is one of the two sanctioned
/// resolution paths for untrusted target addresses (the other being a
/// bounded task copy into a stack buffer).
///
/// [`remap`]: SectionMap::remap
#[derive(Debug)]
pub struct SectionMap {
    base: u64,
    len: usize,
    view: MmapMut,
}

impl SectionMap {
    /// Acquires a window by copying `len` bytes at `addr` out of the
    /// image's task.
    pub(crate) fn acquire(image: &MachImage<'_>, addr: u64, len: u64) -> Result<Self> {
        let len = len as usize;
        let mut view = MmapMut::map_anon(len.max(1)).map_err(|err| {
            warn!("anonymous mapping of {len} bytes failed: {err}");
            Error::Unknown
        })?;
        if len > 0 {
            image.task().copy(addr, &mut view[..len])?;
        }
        Ok(SectionMap {
            base: addr,
            len,
            view,
        })
    }

    /// Returns the window's base address in the target's address space.
    #[inline]
    pub fn base_addr(&self) -> u64 {
        self.base
    }

    /// Returns the window length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the window is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the entire window contents.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.view[..self.len]
    }

    /// Resolves a target address range to a local slice.
    ///
    /// Returns `None` unless `[addr, addr + len)` lies entirely inside the
    /// window. This is the only way to dereference a target pointer through
    /// the map, so an out-of-window pointer can never fault.
    #[inline]
    pub fn remap(&self, addr: u64, len: usize) -> Option<&[u8]> {
        let offset = addr.checked_sub(self.base)? as usize;
        let end = offset.checked_add(len)?;
        if end > self.len {
            return None;
        }
        Some(&self.view[offset..end])
    }

    /// Reads a structure at a target address through the window.
    ///
    /// Fails with [`Error::Invalid`] when the structure does not fit inside
    /// the window.
    #[inline]
    pub fn read_object<T: FromBytes>(&self, addr: u64) -> Result<T> {
        let bytes = self
            .remap(addr, core::mem::size_of::<T>())
            .ok_or(Error::Invalid { addr })?;
        T::read_from_bytes(bytes).map_err(|_| Error::Invalid { addr })
    }

    /// Builds a window directly from bytes, for tests that do not want to
    /// stand up a whole fake image.
    #[cfg(test)]
    pub(crate) fn from_bytes(base: u64, bytes: &[u8]) -> Self {
        let mut view = MmapMut::map_anon(bytes.len().max(1)).expect("anonymous mapping");
        view[..bytes.len()].copy_from_slice(bytes);
        SectionMap {
            base,
            len: bytes.len(),
            view,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remap_in_bounds() {
        let map = SectionMap::from_bytes(0x1000, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(map.base_addr(), 0x1000);
        assert_eq!(map.len(), 8);
        assert_eq!(map.remap(0x1000, 4), Some(&[1, 2, 3, 4][..]));
        assert_eq!(map.remap(0x1004, 4), Some(&[5, 6, 7, 8][..]));
        assert_eq!(map.remap(0x1008, 0), Some(&[][..]));
    }

    #[test]
    fn test_remap_out_of_bounds() {
        let map = SectionMap::from_bytes(0x1000, &[0; 8]);
        // Below the base.
        assert_eq!(map.remap(0xFFF, 1), None);
        // Straddling the end.
        assert_eq!(map.remap(0x1005, 4), None);
        // Entirely past the end.
        assert_eq!(map.remap(0x2000, 1), None);
        // Length overflow must not wrap.
        assert_eq!(map.remap(0x1000, usize::MAX), None);
    }

    #[test]
    fn test_read_object() {
        let map = SectionMap::from_bytes(0x1000, &0xAABBCCDDu32.to_ne_bytes());
        let value: u32 = map.read_object(0x1000).unwrap();
        assert_eq!(value, 0xAABBCCDD);
        assert_eq!(map.read_object::<u64>(0x1000), Err(Error::invalid(0x1000)));
    }

    #[test]
    fn test_empty_window() {
        let map = SectionMap::from_bytes(0x1000, &[]);
        assert!(map.is_empty());
        assert_eq!(map.remap(0x1000, 1), None);
        assert_eq!(map.bytes(), &[] as &[u8]);
    }
}
