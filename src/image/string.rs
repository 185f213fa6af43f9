//! C strings resolved out of a target task.

use core::fmt;

use crate::error::Result;
use crate::image::MachImage;
use crate::util::memchr_null;

/// Bytes copied per read while scanning for the terminator.
const CHUNK: usize = 32;

/// A NUL-terminated string read from the target's address space.
///
/// The contents live in a fixed inline buffer; resolution never touches the
/// heap, which keeps string handling legal in a signal handler. Strings
/// longer than the buffer are truncated. The buffer holds any plausible
/// class or selector name, and truncation can only shorten a reported name,
/// never alias it to a different method's address.
///
/// Values handed to enumeration callbacks are borrows, valid only for the
/// duration of the call.
pub struct MachoString {
    buf: [u8; Self::CAPACITY],
    len: usize,
    addr: u64,
}

impl MachoString {
    /// Maximum number of bytes retained, excluding the terminator.
    pub const CAPACITY: usize = 256;

    /// Resolves the C string at `addr` in the image's task.
    ///
    /// The string is copied forward in small chunks; when a chunk straddles
    /// the end of readable memory the scan degrades to byte-wise reads, so
    /// a string ending just short of an unmapped page still resolves. A
    /// string that runs into unreadable memory before its terminator fails
    /// with [`Access`](crate::Error::Access).
    pub fn new(image: &MachImage<'_>, addr: u64) -> Result<Self> {
        let task = image.task();
        let mut buf = [0u8; Self::CAPACITY];
        let mut len = 0usize;

        while len < Self::CAPACITY {
            let want = CHUNK.min(Self::CAPACITY - len);
            let dst = &mut buf[len..len + want];
            if task.copy(addr + len as u64, dst).is_ok() {
                if let Some(pos) = memchr_null(dst) {
                    return Ok(MachoString {
                        buf,
                        len: len + pos,
                        addr,
                    });
                }
                len += want;
                continue;
            }

            // Chunk ran past readable memory; take it one byte at a time.
            let mut byte = [0u8; 1];
            task.copy(addr + len as u64, &mut byte)?;
            if byte[0] == 0 {
                return Ok(MachoString { buf, len, addr });
            }
            buf[len] = byte[0];
            len += 1;
        }

        Ok(MachoString {
            buf,
            len: Self::CAPACITY,
            addr,
        })
    }

    /// Returns the string contents, without the terminator.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Returns the string length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for the empty string.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the string's address in the target's address space.
    #[inline]
    pub fn addr(&self) -> u64 {
        self.addr
    }
}

impl fmt::Display for MachoString {
    /// Writes the string lossily: invalid UTF-8 sequences render as U+FFFD.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bytes = self.as_bytes();
        loop {
            match core::str::from_utf8(bytes) {
                Ok(text) => return f.write_str(text),
                Err(err) => {
                    let (valid, rest) = bytes.split_at(err.valid_up_to());
                    if let Ok(text) = core::str::from_utf8(valid) {
                        f.write_str(text)?;
                    }
                    f.write_str("\u{FFFD}")?;
                    let skip = err.error_len().unwrap_or(rest.len());
                    bytes = &rest[skip..];
                }
            }
        }
    }
}

impl fmt::Debug for MachoString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MachoString({self} @ {:#x})", self.addr)
    }
}

impl PartialEq for MachoString {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for MachoString {}

impl PartialEq<str> for MachoString {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for MachoString {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::fixtures::{FakeImageBuilder, FakeTask};
    use crate::image::structs::CPU_TYPE_X86_64;

    fn image_with_strings(task: &mut FakeTask) {
        FakeImageBuilder::new64(0x100000000, CPU_TYPE_X86_64)
            .section("__TEXT", "__text", 0x100001000, 4)
            .build(task);
        task.fill(0x100001000, 4, 0x90);
    }

    #[test]
    fn test_resolve_short_string() {
        let mut task = FakeTask::new();
        image_with_strings(&mut task);
        task.alloc(0x20000, 0x100);
        task.write(0x20000, b"viewDidLoad\0");

        let image = MachImage::new(&task, 0x100000000, "test").unwrap();
        let s = MachoString::new(&image, 0x20000).unwrap();
        assert_eq!(s, "viewDidLoad");
        assert_eq!(s.len(), 11);
        assert_eq!(s.to_string(), "viewDidLoad");
    }

    #[test]
    fn test_string_ending_at_region_edge() {
        let mut task = FakeTask::new();
        image_with_strings(&mut task);
        // Region ends right after the terminator; the first 32-byte chunk
        // read must fail and the byte-wise path take over.
        task.alloc(0x30000, 8);
        task.write(0x30000, b"foo\0");

        let image = MachImage::new(&task, 0x100000000, "test").unwrap();
        let s = MachoString::new(&image, 0x30000).unwrap();
        assert_eq!(s, "foo");
    }

    #[test]
    fn test_unterminated_string_at_region_edge_is_access() {
        let mut task = FakeTask::new();
        image_with_strings(&mut task);
        // No terminator before readable memory runs out.
        task.alloc(0x30000, 4);
        task.write(0x30000, b"gone");

        let image = MachImage::new(&task, 0x100000000, "test").unwrap();
        let err = MachoString::new(&image, 0x30000).unwrap_err();
        assert_eq!(err, Error::access(0x30004));
    }

    #[test]
    fn test_unreadable_string_is_access() {
        let mut task = FakeTask::new();
        image_with_strings(&mut task);

        let image = MachImage::new(&task, 0x100000000, "test").unwrap();
        assert_eq!(
            MachoString::new(&image, 0x9999000).unwrap_err(),
            Error::access(0x9999000)
        );
    }

    #[test]
    fn test_long_string_truncates() {
        let mut task = FakeTask::new();
        image_with_strings(&mut task);
        let long = [b'a'; 600];
        task.alloc(0x40000, 0x400);
        task.write(0x40000, &long);
        task.write(0x40000 + 600, b"\0");

        let image = MachImage::new(&task, 0x100000000, "test").unwrap();
        let s = MachoString::new(&image, 0x40000).unwrap();
        assert_eq!(s.len(), MachoString::CAPACITY);
        assert!(s.as_bytes().iter().all(|&b| b == b'a'));
    }

    #[test]
    fn test_lossy_display() {
        let mut task = FakeTask::new();
        image_with_strings(&mut task);
        task.alloc(0x50000, 0x40);
        task.write(0x50000, &[b'o', b'k', 0xFF, b'!', 0]);

        let image = MachImage::new(&task, 0x100000000, "test").unwrap();
        let s = MachoString::new(&image, 0x50000).unwrap();
        assert_eq!(s.to_string(), "ok\u{FFFD}!");
    }
}
