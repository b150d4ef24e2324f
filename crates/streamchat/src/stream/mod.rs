//! Streaming chat rounds.
//!
//! A round takes one user message, streams the assistant reply as
//! [`StreamEvent`]s and records both turns in the session. The
//! [`SseEncoder`] turns those events into SSE frames for htmx.
//!
//! Event order per round: zero or more `Token`, then one `Replace`, then one
//! `Close`. Token payloads carry the cumulative reply so far, not a delta; the
//! placeholder is overwritten on every token, so a dropped frame is repaired
//! by the next one.

mod encoder;
mod error;
mod events;
mod round;

pub use encoder::{SseEncoder, SseFrame};
pub use error::{ErrorKind, RoundError};
pub use events::{RoundState, StreamEvent};
pub use round::{DEFAULT_EVENT_BUFFER, RoundOutcome, StreamSession, error_html, validate_message};
