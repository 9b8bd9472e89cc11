//! # Error
//!
//! Every failure the engine can report. Provider failures are passed through as-is, apart from
//! reads made while walking a pointer chain, which are wrapped in [`Error::UnresolvedPointer`].

use std::io;

use iced_x86::IcedError;
use thiserror::Error;

use crate::provider::Address;

/// Errors produced by providers and engine components
#[derive(Debug, Error)]
pub enum Error {
    /// No running process matched the requested name
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    /// The process has no loaded module with the requested name
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    /// The provider could not read or write the requested range
    #[error("Failed to access {size} bytes of process memory at {address:#x}")]
    MemoryAccess {
        /// Start of the range
        address: Address,
        /// Length of the range
        size: usize,
        /// Underlying OS or provider failure
        #[source]
        source: io::Error,
    },

    /// An intermediate read failed while walking an offset chain
    #[error("Failed to resolve pointer at level {level} ({address:#x})")]
    UnresolvedPointer {
        /// Index of the offset whose dereference failed
        level: usize,
        /// Address that could not be read
        address: Address,
        /// The provider's failure
        #[source]
        source: Box<Error>,
    },

    /// The provider could not allocate memory in the target
    #[error("Failed to allocate {size} bytes in the target process")]
    Allocation {
        /// Requested allocation size
        size: usize,
        /// Underlying OS or provider failure
        #[source]
        source: io::Error,
    },

    /// Malformed hex-byte text
    #[error("Invalid hex byte {token:?}: {reason}")]
    Format {
        /// Offending token (empty for empty input)
        token: String,
        /// What was wrong with it
        reason: &'static str,
    },

    /// A value or displacement does not fit its target width
    #[error("{0}")]
    Range(String),

    /// The instruction encoder rejected a jump
    #[error("Failed to encode instruction: {0}")]
    Encoding(#[from] IcedError),

    /// Caller-supplied records violate their length or shape invariants
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A target profile could not be loaded or does not define what was asked for
    #[error("Profile error: {0}")]
    Profile(String),

    /// IO error while reading a profile from disk
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Target profile is not valid TOML or does not match the profile layout
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Helper for building a [`Error::MemoryAccess`] from an `io::Error`
    pub fn memory_access(address: Address, size: usize, source: io::Error) -> Self {
        Self::MemoryAccess {
            address,
            size,
            source,
        }
    }

    /// Returns `true` if this error came from a failed read or write, wrapped or not
    pub fn is_memory_access(&self) -> bool {
        match self {
            Error::MemoryAccess { .. } => true,
            Error::UnresolvedPointer { source, .. } => source.is_memory_access(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;
    use std::io;

    use super::Error;

    #[test]
    /// Wrapped chain failures still report as memory access failures and keep their source
    fn test_unresolved_pointer_source() {
        let inner = Error::memory_access(0x1000, 4, io::Error::other("unmapped"));
        let err = Error::UnresolvedPointer {
            level: 1,
            address: 0x1000,
            source: Box::new(inner),
        };

        assert!(err.is_memory_access());
        assert_eq!(
            err.to_string(),
            "Failed to resolve pointer at level 1 (0x1000)"
        );

        // the provider error is reachable through the source chain
        let source = err.source().unwrap();
        assert!(source.to_string().contains("0x1000"));
    }

    #[test]
    /// Non-memory errors are not classified as memory access failures
    fn test_is_memory_access() {
        assert!(!Error::ProcessNotFound("game.exe".into()).is_memory_access());
        assert!(!Error::Range("too big".into()).is_memory_access());
    }
}
