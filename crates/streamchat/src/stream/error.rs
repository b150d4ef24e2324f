//! Round error types.

use serde::Serialize;
use thiserror::Error;

use crate::completion::CompletionError;

/// Coarse error category shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Empty or malformed message; rejected before any state changes.
    Validation,
    /// No provider credential is configured.
    Configuration,
    /// The provider failed, broke off, or timed out.
    Provider,
}

impl ErrorKind {
    /// Fixed browser-facing text. Internal detail is only logged.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "Please enter a message.",
            ErrorKind::Configuration => {
                "The assistant is not configured: no API key is set (OPENAI_API_KEY)."
            }
            ErrorKind::Provider => {
                "The assistant could not finish this reply. Please try again."
            }
        }
    }
}

/// Errors that end a round.
#[derive(Debug, Error)]
pub enum RoundError {
    #[error("invalid message: {0}")]
    Validation(String),

    #[error("no completion provider configured")]
    NotConfigured,

    #[error("completion failed: {0}")]
    Provider(#[from] CompletionError),
}

impl RoundError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RoundError::Validation(_) => ErrorKind::Validation,
            RoundError::NotConfigured => ErrorKind::Configuration,
            RoundError::Provider(_) => ErrorKind::Provider,
        }
    }

    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }
}
