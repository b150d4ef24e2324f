//! HTML templates for the page shell and chat fragments.
//!
//! Templates are embedded in the binary. Files ending in `.html` are
//! auto-escaped, so user text can be passed in directly; only rendered
//! Markdown is marked safe.

use minijinja::value::Value;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::markdown::html_escape;
use crate::session::{ChatRole, ChatTurn};

const INDEX: &str = "index.html";
const CHAT_MESSAGE: &str = "chat_message.html";
const CHAT_STREAM: &str = "chat_stream.html";

/// One chat bubble as the templates see it.
#[derive(Debug, Clone, Serialize)]
pub struct TurnView {
    pub role: ChatRole,
    /// Plain text, escaped by the template.
    pub text: String,
    /// Pre-rendered HTML, inserted as-is when present.
    pub html: Option<String>,
    pub error: bool,
}

impl TurnView {
    pub fn text(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            html: None,
            error: false,
        }
    }

    pub fn html(role: ChatRole, html: impl Into<String>) -> Self {
        Self {
            role,
            text: String::new(),
            html: Some(html.into()),
            error: false,
        }
    }

    /// Bubble for a stored turn. Assistant turns take their rendered HTML.
    pub fn from_turn(turn: &ChatTurn, rendered: Option<String>) -> Self {
        match rendered {
            Some(html) => Self::html(turn.role, html),
            None => Self::text(turn.role, turn.text.clone()),
        }
    }

    pub fn as_error(mut self) -> Self {
        self.error = true;
        self
    }
}

/// Embedded template set.
#[derive(Debug)]
pub struct Templates {
    env: Environment<'static>,
}

impl Templates {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template(INDEX, include_str!("../templates/index.html"))?;
        env.add_template(CHAT_MESSAGE, include_str!("../templates/chat_message.html"))?;
        env.add_template(CHAT_STREAM, include_str!("../templates/chat_stream.html"))?;
        Ok(Self { env })
    }

    /// Full page with the conversation so far.
    pub fn render_index(&self, title: &str, turns: &[TurnView]) -> Result<String, minijinja::Error> {
        self.env
            .get_template(INDEX)?
            .render(context! { title => title, turns => turns })
    }

    /// A single chat bubble.
    pub fn render_message(&self, turn: &TurnView) -> Result<String, minijinja::Error> {
        self.env
            .get_template(CHAT_MESSAGE)?
            .render(context! { turn => turn })
    }

    /// The user bubble plus an assistant placeholder subscribed to the stream.
    pub fn render_stream(
        &self,
        session_id: &str,
        message_id: &str,
        message: &str,
    ) -> Result<String, minijinja::Error> {
        let turn = TurnView::text(ChatRole::User, message);
        self.env.get_template(CHAT_STREAM)?.render(context! {
            turn => turn,
            message_id => message_id,
            // The auto-escaper would also entity-encode `/`; only `&` needs it here.
            stream_url => Value::from_safe_string(html_escape(&stream_url(session_id, message_id, message))),
        })
    }
}

/// `GET` URL of the SSE stream for one message.
pub fn stream_url(session_id: &str, message_id: &str, message: &str) -> String {
    format!(
        "/chat_stream/{}?message={}&message_id={}",
        urlencoding::encode(session_id),
        urlencoding::encode(message),
        urlencoding::encode(message_id),
    )
}
