//! Error types for WIS2 ingest

use thiserror::Error;

/// Result type alias for WIS2 operations
pub type Result<T> = std::result::Result<T, Wis2Error>;

/// Main error type shared by the WIS2 crates
#[derive(Error, Debug)]
pub enum Wis2Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checksum mismatch ({method}): expected {expected}, got {actual}")]
    ChecksumMismatch {
        method: String,
        expected: String,
        actual: String,
    },

    #[error("Unsupported integrity method: '{0}'")]
    UnsupportedIntegrityMethod(String),

    #[error("Invalid notification: {0}")]
    Validation(String),
}

impl Wis2Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
