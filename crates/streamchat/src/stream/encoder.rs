//! SSE framing for round events.
//!
//! Framing policy: a payload never carries a raw line break inside a single
//! `data:` field. Line endings are normalized to `\n` and a multi-line
//! payload becomes one `data:` line per payload line, which EventSource joins
//! back with `\n`. That keeps `<pre>` blocks in rendered Markdown intact.
//!
//! Content policy: token payloads are plain text, HTML-escaped with line
//! breaks turned into `<br>`. Replace payloads are already-sanitized HTML and
//! are wrapped, not escaped.

use axum::response::sse::Event;

use super::events::StreamEvent;
use crate::markdown::html_escape;

/// A named SSE event ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: &'static str,
    pub data: String,
}

impl SseFrame {
    /// Raw wire text: `event: <name>\ndata: <line>\n...\n\n`.
    pub fn to_wire(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + 32);
        out.push_str("event: ");
        out.push_str(self.event);
        out.push('\n');
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

impl From<SseFrame> for Event {
    fn from(frame: SseFrame) -> Self {
        Event::default().event(frame.event).data(frame.data)
    }
}

/// Encodes the events of one round, addressed to one placeholder element.
#[derive(Debug, Clone)]
pub struct SseEncoder {
    message_id: String,
}

impl SseEncoder {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
        }
    }

    /// DOM id of the assistant placeholder this round replaces.
    pub fn placeholder_id(&self) -> String {
        format!("message-{}", self.message_id)
    }

    pub fn encode(&self, event: &StreamEvent) -> SseFrame {
        let data = match event {
            StreamEvent::Token(text) => token_payload(text),
            StreamEvent::Replace(html) => self.replace_payload(&normalize_newlines(html)),
            StreamEvent::Close => String::new(),
        };
        SseFrame {
            event: event.name(),
            data,
        }
    }

    fn replace_payload(&self, html: &str) -> String {
        format!(
            r#"<div id="{id}" class="message assistant" hx-swap-oob="outerHTML"><div class="content">{html}</div></div>"#,
            id = self.placeholder_id(),
        )
    }
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn token_payload(text: &str) -> String {
    html_escape(&normalize_newlines(text)).replace('\n', "<br>")
}
