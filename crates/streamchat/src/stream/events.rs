//! Round events and states.

use serde::Serialize;

/// One item emitted by a chat round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Cumulative reply text so far.
    Token(String),
    /// Final HTML for the assistant bubble (rendered reply or error notice).
    Replace(String),
    /// End of the round.
    Close,
}

impl StreamEvent {
    /// SSE event name for this event.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Token(_) => "token",
            StreamEvent::Replace(_) => "replace",
            StreamEvent::Close => "close",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Close)
    }
}

/// Lifecycle of a single round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundState {
    Idle,
    AwaitingFirstToken,
    Streaming,
    Finalizing,
    Closed,
    Errored,
    /// The client went away before the round finished.
    Cancelled,
}

impl RoundState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RoundState::Closed | RoundState::Errored | RoundState::Cancelled
        )
    }
}

impl std::fmt::Display for RoundState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RoundState::Idle => "idle",
            RoundState::AwaitingFirstToken => "awaiting_first_token",
            RoundState::Streaming => "streaming",
            RoundState::Finalizing => "finalizing",
            RoundState::Closed => "closed",
            RoundState::Errored => "errored",
            RoundState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}
