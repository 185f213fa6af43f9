//! Error types for crash-time Objective-C metadata parsing.
//!
//! The error set is deliberately small: the parser runs inside a signal
//! handler over memory it does not trust, so every failure collapses into
//! one of a handful of outcomes the caller can act on.

use thiserror::Error;

/// The main error type for Objective-C metadata operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A requested section does not exist, an image carries no Objective-C
    /// metadata, or no method matched the search address.
    ///
    /// This is a valid outcome, not a failure; callers should not log it
    /// as an error.
    #[error("no matching Objective-C metadata found")]
    NotFound,

    /// A pointer read from the target referenced memory outside the mapped
    /// section it was expected to lie in. Indicates a corrupted or
    /// unexpected image layout.
    #[error("invalid Objective-C metadata at {addr:#x}")]
    Invalid {
        /// The target-address-space location that failed to resolve.
        addr: u64,
    },

    /// The target task's memory at the given address could not be read,
    /// typically because the page is unmapped or protected.
    #[error("target memory at {addr:#x} is not accessible")]
    Access {
        /// The target-address-space location that could not be read.
        addr: u64,
    },

    /// An unexpected failure, such as the local page allocator refusing a
    /// mapping.
    #[error("unexpected failure during Objective-C parsing")]
    Unknown,
}

/// A specialized Result type for Objective-C metadata operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if this error is the benign "metadata absent" outcome.
    ///
    /// `NotFound` flows through the parser as ordinary control flow (missing
    /// sections, no matching method) and must not be reported the way a
    /// corrupt image or an unreadable page is.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }

    /// Creates an invalid-metadata error for the given target address.
    #[inline]
    pub fn invalid(addr: u64) -> Self {
        Error::Invalid { addr }
    }

    /// Creates an inaccessible-memory error for the given target address.
    #[inline]
    pub fn access(addr: u64) -> Self {
        Error::Access { addr }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_predicate() {
        assert!(Error::NotFound.is_not_found());
        assert!(!Error::invalid(0x1000).is_not_found());
        assert!(!Error::access(0x1000).is_not_found());
        assert!(!Error::Unknown.is_not_found());
    }

    #[test]
    fn test_display_carries_address() {
        let msg = Error::access(0xdeadbeef).to_string();
        assert!(msg.contains("0xdeadbeef"));
    }
}
