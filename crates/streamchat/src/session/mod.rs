//! Chat session management.
//!
//! Sessions live in process memory and are addressed by the `session_id`
//! cookie. Each session owns an append-only conversation history and a lock
//! that serializes chat rounds.

mod ids;
mod models;
mod store;

pub use ids::{is_valid_message_id, is_valid_session_id, new_message_id, new_session_id};
pub use models::{ChatRole, ChatTurn};
pub use store::{InMemorySessionStore, RoundGuard, Session, SessionStore};
