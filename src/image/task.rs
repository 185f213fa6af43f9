//! Target task memory access.
//!
//! All I/O the parser performs funnels through [`TaskMemory::copy`], a
//! single bounded read out of the inspected task's address space. In the
//! crash-handler deployment this wraps one reentrant Mach syscall; no other
//! access path to target memory exists, which is what makes every pointer
//! the parser follows checkable.

use crate::error::Result;

/// Read-only access to another task's address space.
///
/// Implementations must be reentrant and async-signal-safe: no locks, no
/// heap, no non-reentrant library calls. The parser calls `copy` from a
/// signal handler while the target (possibly this very process) is in an
/// undefined state.
pub trait TaskMemory {
    /// Copies `dst.len()` bytes starting at `addr` in the target task into
    /// `dst`.
    ///
    /// A short read is an error: either the full range is readable and
    /// `Ok(())` is returned, or the destination contents are unspecified
    /// and an [`Access`](crate::Error::Access) error identifies the
    /// faulting address.
    fn copy(&self, addr: u64, dst: &mut [u8]) -> Result<()>;
}

/// Byte-order descriptor for a target image.
///
/// Structures copied out of the target are reinterpreted in host order;
/// when the image's byte order differs from the host's, every multi-byte
/// field must be swapped on extraction. The descriptor makes that decision
/// once, at image discovery, from the Mach magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteOrder {
    swapped: bool,
}

impl ByteOrder {
    /// The image uses the host's byte order; swaps are the identity.
    #[inline]
    pub const fn native() -> Self {
        ByteOrder { swapped: false }
    }

    /// The image uses the opposite byte order; swaps reverse bytes.
    #[inline]
    pub const fn swapped() -> Self {
        ByteOrder { swapped: true }
    }

    /// Returns true if fields from this image require byte reversal.
    #[inline]
    pub const fn is_swapped(self) -> bool {
        self.swapped
    }

    /// Converts a 16-bit field from image order to host order.
    #[inline]
    pub const fn swap16(self, value: u16) -> u16 {
        if self.swapped { value.swap_bytes() } else { value }
    }

    /// Converts a 32-bit field from image order to host order.
    #[inline]
    pub const fn swap32(self, value: u32) -> u32 {
        if self.swapped { value.swap_bytes() } else { value }
    }

    /// Converts a 64-bit field from image order to host order.
    #[inline]
    pub const fn swap64(self, value: u64) -> u64 {
        if self.swapped { value.swap_bytes() } else { value }
    }
}

#[cfg(target_os = "macos")]
mod mach {
    use mach2::kern_return::KERN_SUCCESS;
    use mach2::port::mach_port_t;
    use mach2::vm::mach_vm_read_overwrite;
    use mach2::vm_types::{mach_vm_address_t, mach_vm_size_t};

    use super::TaskMemory;
    use crate::error::{Error, Result};

    /// A Mach task port wrapped as a [`TaskMemory`] source.
    ///
    /// `mach_vm_read_overwrite` copies into caller-provided storage in a
    /// single trap, making it safe to call with the target suspended or
    /// crashed.
    #[derive(Debug, Clone, Copy)]
    pub struct MachTask {
        port: mach_port_t,
    }

    impl MachTask {
        /// Wraps an existing task port. The caller retains ownership of the
        /// port right.
        pub fn new(port: mach_port_t) -> Self {
            MachTask { port }
        }

        /// Returns a reader for the calling task, for self-inspection from
        /// an in-process crash handler.
        pub fn current() -> Self {
            // SAFETY: mach_task_self is a trap returning the caller's port.
            MachTask {
                port: unsafe { mach2::traps::mach_task_self() },
            }
        }

        /// Returns the underlying task port.
        pub fn port(&self) -> mach_port_t {
            self.port
        }
    }

    impl TaskMemory for MachTask {
        fn copy(&self, addr: u64, dst: &mut [u8]) -> Result<()> {
            let mut out_size: mach_vm_size_t = 0;
            // SAFETY: the destination range is owned by `dst` for the
            // duration of the trap; the kernel validates the source range.
            let kr = unsafe {
                mach_vm_read_overwrite(
                    self.port,
                    addr as mach_vm_address_t,
                    dst.len() as mach_vm_size_t,
                    dst.as_mut_ptr() as mach_vm_address_t,
                    &mut out_size,
                )
            };
            if kr != KERN_SUCCESS || out_size != dst.len() as mach_vm_size_t {
                return Err(Error::access(addr));
            }
            Ok(())
        }
    }
}

#[cfg(target_os = "macos")]
pub use mach::MachTask;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_is_identity() {
        let bo = ByteOrder::native();
        assert!(!bo.is_swapped());
        assert_eq!(bo.swap16(0x1122), 0x1122);
        assert_eq!(bo.swap32(0x11223344), 0x11223344);
        assert_eq!(bo.swap64(0x1122334455667788), 0x1122334455667788);
    }

    #[test]
    fn test_swapped_reverses_bytes() {
        let bo = ByteOrder::swapped();
        assert!(bo.is_swapped());
        assert_eq!(bo.swap16(0x1122), 0x2211);
        assert_eq!(bo.swap32(0x11223344), 0x44332211);
        assert_eq!(bo.swap64(0x1122334455667788), 0x8877665544332211);
    }
}
