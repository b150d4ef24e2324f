//! Completion provider error types.

use std::time::Duration;

use thiserror::Error;

/// Result type for completion operations.
pub type CompletionResult<T> = Result<T, CompletionError>;

/// Errors raised while establishing or consuming a completion.
///
/// The text of these errors is for logs only. Browser-facing messages are
/// fixed strings chosen by the round, never this detail.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Provider answered with a non-success status.
    #[error("provider returned {status}: {body}")]
    Upstream { status: u16, body: String },

    /// The event stream broke after it was established.
    #[error("stream interrupted: {0}")]
    Stream(String),

    /// A chunk could not be decoded.
    #[error("failed to parse provider chunk: {0}")]
    Parse(String),

    /// No fragment arrived before the round deadline.
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),

    /// The request could not be built.
    #[error("invalid completion request: {0}")]
    InvalidRequest(String),
}

impl CompletionError {
    /// HTTP status reported by the provider, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            CompletionError::Upstream { status, .. } => Some(*status),
            CompletionError::RequestFailed(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
