//! Error types for docsync
//!
//! This module defines the error type shared by every docsync crate.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Only recoverable conditions live here. Caller bugs (shutting down twice,
//! acknowledging a batch that is not the queue head, nested transactions)
//! are assertions, not errors.

use std::io;
use thiserror::Error;

/// Result type alias for docsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for docsync
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations on the durable backend)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Record serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Persisted data failed an integrity check
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Caller supplied a malformed argument (path, config value, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The key-value backend rejected an operation
    #[error("Backend error: {0}")]
    Backend(String),

    /// An internal consistency check failed
    #[error("Consistency check failed: {0}")]
    Consistency(String),

    /// Encoded value bytes could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_io() {
        let err = Error::Io(io::Error::new(io::ErrorKind::NotFound, "file not found"));
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
    }

    #[test]
    fn test_error_display_corruption() {
        let err = Error::Corruption("CRC check failed".to_string());
        let msg = err.to_string();
        assert!(msg.contains("Data corruption"));
        assert!(msg.contains("CRC check failed"));
    }

    #[test]
    fn test_error_display_consistency() {
        let err = Error::Consistency("batch ids out of order".to_string());
        let msg = err.to_string();
        assert!(msg.contains("Consistency check failed"));
        assert!(msg.contains("out of order"));
    }

    #[test]
    fn test_error_display_invalid_input() {
        let err = Error::InvalidInput("odd path".to_string());
        assert!(err.to_string().contains("Invalid input: odd path"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_rmp_decode() {
        // A lone array marker with no elements following is truncated input
        let result: Result<Vec<String>> = rmp_serde::from_slice(&[0x93]).map_err(|e| e.into());
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }

        fn returns_error() -> Result<i32> {
            Err(Error::Backend("closed".to_string()))
        }

        assert_eq!(returns_result().unwrap(), 42);
        assert!(returns_error().is_err());
    }
}
