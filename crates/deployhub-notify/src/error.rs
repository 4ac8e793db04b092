//! Error types for webhook delivery.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single webhook attempt.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Connecting or sending failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// No response within the timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint answered with a non-success status.
    #[error("endpoint returned {0}")]
    Status(u16),

    /// The URL cannot be used.
    #[error("invalid webhook url: {0}")]
    InvalidUrl(String),
}

impl NotifyError {
    /// Whether another attempt may succeed. Client errors other than
    /// `408` and `429` are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            NotifyError::Transport(_) | NotifyError::Timeout(_) => true,
            NotifyError::Status(code) => *code >= 500 || *code == 408 || *code == 429,
            NotifyError::InvalidUrl(_) => false,
        }
    }
}
