//! HTTP API module.
//!
//! Serves the chat page, the htmx fragments and the SSE reply stream.

mod cookie;
mod error;
mod handlers;
mod routes;
mod state;

pub use cookie::{SESSION_COOKIE, SessionCookie, session_cookie};
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
