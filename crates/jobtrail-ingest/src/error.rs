//! Error types for the shipping pipeline
//!
//! Every variant names the operation that failed and the server, sink, or checkpoint
//! it failed against. Nothing in this crate retries; callers decide whether a failed
//! run is re-invoked later.

use jobtrail_common::JobtrailError;
use thiserror::Error;

use crate::sink::SinkError;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// The source server could not be reached or refused the session
    #[error("Connectivity error for '{server}': {reason}")]
    Connectivity { server: String, reason: String },

    /// A row could not be decoded; the checkpoint stays at the last commit
    #[error("Scan decode error at cursor {cursor}: {reason}")]
    ScanDecode { cursor: i64, reason: String },

    #[error("sink.open: {sink}: {source}")]
    SinkOpen {
        sink: String,
        #[source]
        source: SinkError,
    },

    #[error("sink.write: {sink}: {source}")]
    SinkWrite {
        sink: String,
        #[source]
        source: SinkError,
    },

    #[error("sink.flush: {sink}: {source}")]
    SinkFlush {
        sink: String,
        #[source]
        source: SinkError,
    },

    #[error("sink.clean: {sink}: {source}")]
    SinkClean {
        sink: String,
        #[source]
        source: SinkError,
    },

    #[error("Checkpoint {operation} failed for '{key}': {reason}")]
    Checkpoint {
        operation: &'static str,
        key: String,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] JobtrailError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IngestError {
    /// Create a connectivity error
    pub fn connectivity(server: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Connectivity {
            server: server.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a checkpoint error
    pub fn checkpoint(
        operation: &'static str,
        key: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::Checkpoint {
            operation,
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error came from a sink's flush or clean step
    pub fn is_finalize_error(&self) -> bool {
        matches!(self, Self::SinkFlush { .. } | Self::SinkClean { .. })
    }
}
