//! API route definitions.

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, warn};

use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    // Tracing layer with request IDs and timing
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let mut router = Router::new()
        .route("/", get(handlers::index))
        .route("/chat", post(handlers::chat))
        .route("/chat/user", post(handlers::chat_user))
        .route("/chat/echo", post(handlers::chat_echo))
        .route("/chat/complete", post(handlers::chat_complete))
        .route("/chat/reset", post(handlers::chat_reset))
        .route("/chat_stream/{session_id}", get(handlers::chat_stream))
        .route("/health", get(handlers::health));

    match state.static_dir.as_ref() {
        Some(dir) if dir.is_dir() => {
            router = router.nest_service("/static", ServeDir::new(dir));
        }
        Some(dir) => warn!(path = %dir.display(), "Static directory not found, /static disabled"),
        None => {}
    }

    router.layer(trace_layer).with_state(state)
}
