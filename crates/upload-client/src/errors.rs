//! Upload client error types.
//!
//! Every terminal task failure carries one of these; its `Display` text is
//! what lands in the task snapshot's `error` field.

use thiserror::Error;

/// Upload client error type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    /// Client configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The byte source is empty; nothing was sent.
    #[error("Source is empty; zero-length uploads are not supported")]
    EmptySource,

    /// The broker refused or failed to open a session.
    #[error("Upload initiation failed: {0}")]
    Initiation(String),

    /// Transport failure or deadline expiry.
    #[error("Network error: {0}")]
    Network(String),

    /// Consecutive chunk failures exceeded the retry bound.
    #[error("Upload failed after {attempts} consecutive attempts")]
    RetryExhausted { attempts: u32 },

    /// The status query used for recovery could not be completed.
    #[error("Upload recovery failed: {0}")]
    Recovery(String),

    /// The byte source could not be read.
    #[error("Failed to read source: {0}")]
    Source(String),

    /// The task was removed from the queue.
    #[error("Upload cancelled")]
    Cancelled,
}
