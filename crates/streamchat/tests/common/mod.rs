//! Test utilities and common setup.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use tower::ServiceExt;

use streamchat::api::{self, AppState};
use streamchat::completion::{CompletionClient, ScriptedClient};
use streamchat::session::{InMemorySessionStore, SessionStore};
use streamchat::templates::Templates;

/// Router plus a handle on its session store.
pub struct TestApp {
    pub router: Router,
    pub sessions: Arc<dyn SessionStore>,
}

/// App whose provider always answers "The answer is 4." in four fragments.
pub fn test_app() -> TestApp {
    test_app_with(Some(Arc::new(ScriptedClient::new([
        "The", " answer", " is", " 4.",
    ]))))
}

/// App with the given completion client (`None` means no credential).
pub fn test_app_with(completion: Option<Arc<dyn CompletionClient>>) -> TestApp {
    let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let templates = Arc::new(Templates::new().unwrap());
    let state = AppState::new(sessions.clone(), completion, templates)
        .with_round_timeout(Duration::from_secs(5))
        .with_title("Test Chat");
    TestApp {
        router: api::create_router(state),
        sessions,
    }
}

/// Response status, headers and body text.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn set_cookie(&self) -> Option<&str> {
        self.headers
            .get(header::SET_COOKIE)
            .and_then(|h| h.to_str().ok())
    }
}

impl TestApp {
    pub async fn request(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        TestResponse {
            status,
            headers,
            body: String::from_utf8(body.to_vec()).unwrap(),
        }
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().uri(uri).method(Method::GET);
        if let Some(id) = cookie {
            builder = builder.header(header::COOKIE, format!("session_id={id}"));
        }
        self.request(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_form(&self, uri: &str, form: &str, cookie: Option<&str>) -> TestResponse {
        let mut builder = Request::builder()
            .uri(uri)
            .method(Method::POST)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(id) = cookie {
            builder = builder.header(header::COOKIE, format!("session_id={id}"));
        }
        self.request(builder.body(Body::from(form.to_string())).unwrap())
            .await
    }
}

/// One parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    pub event: String,
    pub data: String,
}

/// Split an SSE body into events, joining multi-line data and skipping
/// comments.
pub fn parse_sse(body: &str) -> Vec<SseMessage> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data: Vec<&str> = Vec::new();
            for line in block.lines() {
                if let Some(value) = line.strip_prefix("event:") {
                    event = Some(value.strip_prefix(' ').unwrap_or(value).to_string());
                } else if let Some(value) = line.strip_prefix("data:") {
                    data.push(value.strip_prefix(' ').unwrap_or(value));
                }
            }
            event.map(|event| SseMessage {
                event,
                data: data.join("\n"),
            })
        })
        .collect()
}

/// Text content of an HTML fragment.
pub fn strip_tags(html: &str) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}
