//! Session and message identifiers.

/// Number of random bytes in a session id (hex-encoded to twice as many chars).
const SESSION_ID_BYTES: usize = 16;

/// Upper bound on accepted identifier length.
const MAX_ID_LEN: usize = 64;

/// Generate a new session id: 16 random bytes, hex encoded.
pub fn new_session_id() -> String {
    let bytes: [u8; SESSION_ID_BYTES] = rand::random();
    hex::encode(bytes)
}

/// Generate a new message id for addressing one assistant placeholder.
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Session ids coming from cookies or paths must be short and URL/DOM safe.
pub fn is_valid_session_id(id: &str) -> bool {
    is_token(id)
}

/// Message ids end up in DOM element ids, so the same rules apply.
pub fn is_valid_message_id(id: &str) -> bool {
    is_token(id)
}

fn is_token(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
