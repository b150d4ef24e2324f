//! HTTP request handlers.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Json,
    extract::{Form, Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    response::{Html, IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument};

use super::cookie::SessionCookie;
use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::markdown::render_markdown_batch;
use crate::session::{
    ChatRole, ChatTurn, is_valid_message_id, is_valid_session_id, new_message_id,
};
use crate::stream::{
    DEFAULT_EVENT_BUFFER, RoundOutcome, SseEncoder, StreamSession, error_html, validate_message,
};
use crate::templates::TurnView;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Name of the completion backend, `None` when no credential is set.
    pub provider: Option<String>,
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        provider: state
            .completion
            .as_ref()
            .map(|client| client.name().to_string()),
    })
}

/// Body of the chat forms.
#[derive(Debug, Deserialize)]
pub struct ChatForm {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub message: Option<String>,
    pub message_id: Option<String>,
}

/// Page shell with the current conversation.
#[instrument(skip(state, cookie))]
pub async fn index(State(state): State<AppState>, cookie: SessionCookie) -> ApiResult<Response> {
    let history = match state.sessions.get(&cookie.id).await {
        Some(session) => session.history().await,
        None => Vec::new(),
    };
    let turns = render_history(&history).await;
    let page = state.templates.render_index(&state.title, &turns)?;
    Ok((cookie.headers(), Html(page)).into_response())
}

async fn render_history(history: &[ChatTurn]) -> Vec<TurnView> {
    let replies = history
        .iter()
        .filter(|turn| turn.role == ChatRole::Assistant)
        .map(|turn| turn.text.clone())
        .collect();
    let mut rendered = render_markdown_batch(replies).await.into_iter();

    history
        .iter()
        .map(|turn| {
            let html = match turn.role {
                ChatRole::Assistant => rendered.next(),
                _ => None,
            };
            TurnView::from_turn(turn, html)
        })
        .collect()
}

/// Accept a message and return the user bubble plus a streaming placeholder.
#[instrument(skip(state, cookie, form), fields(session_id = %cookie.id))]
pub async fn chat(
    State(state): State<AppState>,
    cookie: SessionCookie,
    Form(form): Form<ChatForm>,
) -> ApiResult<Response> {
    let message = validate_message(&form.message)?;
    let message_id = new_message_id();
    debug!(message_id = %message_id, "Chat message accepted");

    let fragment = state
        .templates
        .render_stream(&cookie.id, &message_id, &message)?;
    Ok((cookie.headers(), Html(fragment)).into_response())
}

/// Stream one round as SSE.
#[instrument(skip(state, query))]
pub async fn chat_stream(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    if !is_valid_session_id(&session_id) {
        return Err(ApiError::bad_request("invalid session id"));
    }
    let message = validate_message(query.message.as_deref().unwrap_or_default())?;
    let message_id = query
        .message_id
        .filter(|id| is_valid_message_id(id))
        .ok_or_else(|| ApiError::bad_request("missing or invalid message_id"))?;

    let session = state.sessions.get_or_create(&session_id).await;
    if !session.claim_message(&message_id).await {
        return Err(ApiError::conflict(format!(
            "message {message_id} was already streamed"
        )));
    }

    let round = StreamSession::new(
        session,
        state.completion.clone(),
        &message,
        state.round_timeout,
    )?;
    let (tx, rx) = mpsc::channel(DEFAULT_EVENT_BUFFER);
    tokio::spawn(round.run(tx));
    info!(message_id = %message_id, "Chat stream opened");

    let encoder = SseEncoder::new(message_id);
    let events = ReceiverStream::new(rx)
        .map(move |event| Ok::<_, Infallible>(Event::from(encoder.encode(&event))));

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(KEEPALIVE_INTERVAL)
            .text("keepalive"),
    ))
}

/// User bubble only.
pub async fn chat_user(
    State(state): State<AppState>,
    Form(form): Form<ChatForm>,
) -> ApiResult<Html<String>> {
    let message = validate_message(&form.message)?;
    let html = state
        .templates
        .render_message(&TurnView::text(ChatRole::User, message))?;
    Ok(Html(html))
}

/// Assistant bubble repeating the message. Does not touch the session.
pub async fn chat_echo(
    State(state): State<AppState>,
    Form(form): Form<ChatForm>,
) -> ApiResult<Html<String>> {
    let message = validate_message(&form.message)?;
    let user = state
        .templates
        .render_message(&TurnView::text(ChatRole::User, message.clone()))?;
    let echo = state
        .templates
        .render_message(&TurnView::text(ChatRole::Assistant, message))?;
    Ok(Html(format!("{user}\n{echo}")))
}

/// Single-shot round: user bubble plus the finished assistant bubble.
#[instrument(skip(state, cookie, form), fields(session_id = %cookie.id))]
pub async fn chat_complete(
    State(state): State<AppState>,
    cookie: SessionCookie,
    Form(form): Form<ChatForm>,
) -> ApiResult<Response> {
    let message = validate_message(&form.message)?;
    let session = state.sessions.get_or_create(&cookie.id).await;
    let round = StreamSession::new(
        session,
        state.completion.clone(),
        &message,
        state.round_timeout,
    )?;

    let reply = match round.complete().await {
        RoundOutcome::Completed { html, .. } => TurnView::html(ChatRole::Assistant, html),
        RoundOutcome::Failed(kind) => {
            TurnView::html(ChatRole::Assistant, error_html(kind)).as_error()
        }
        RoundOutcome::Cancelled => return Err(ApiError::internal("round cancelled")),
    };

    let user = state
        .templates
        .render_message(&TurnView::text(ChatRole::User, message))?;
    let reply = state.templates.render_message(&reply)?;
    Ok((cookie.headers(), Html(format!("{user}\n{reply}"))).into_response())
}

/// Forget the current conversation and start a new session.
#[instrument(skip(state, cookie), fields(session_id = %cookie.id))]
pub async fn chat_reset(State(state): State<AppState>, cookie: SessionCookie) -> Response {
    if state.sessions.evict(&cookie.id).await {
        info!("Chat session reset");
    }
    (SessionCookie::fresh().headers(), Html(String::new())).into_response()
}
