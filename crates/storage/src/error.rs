//! Error types for storage operations.

use thiserror::Error;

/// Errors from fingerprinting and cache operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The source location could not be fingerprinted.
    #[error("fingerprint error for {location}: {message}")]
    Fingerprint { location: String, message: String },

    /// Underlying filesystem error.
    #[error("storage I/O error: {0}")]
    Io(String),
}

impl StorageError {
    /// Create a Fingerprint error.
    pub fn fingerprint(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fingerprint {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
