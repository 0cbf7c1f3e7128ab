//! Error types shared across jobtrail crates

use thiserror::Error;

/// Result type alias for shared operations
pub type Result<T> = std::result::Result<T, JobtrailError>;

/// Errors raised by shared helpers
#[derive(Error, Debug)]
pub enum JobtrailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },
}

impl JobtrailError {
    /// Create an invalid timestamp error
    pub fn invalid_timestamp(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTimestamp {
            value: value.into(),
            reason: reason.into(),
        }
    }
}
