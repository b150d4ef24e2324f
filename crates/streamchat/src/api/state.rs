//! Application state shared across handlers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::completion::CompletionClient;
use crate::session::SessionStore;
use crate::templates::Templates;

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Conversation histories keyed by session id.
    pub sessions: Arc<dyn SessionStore>,
    /// `None` when no provider credential is configured.
    pub completion: Option<Arc<dyn CompletionClient>>,
    pub templates: Arc<Templates>,
    /// Deadline for one chat round.
    pub round_timeout: Duration,
    /// Page title.
    pub title: String,
    /// Directory served under `/static`, if any.
    pub static_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        completion: Option<Arc<dyn CompletionClient>>,
        templates: Arc<Templates>,
    ) -> Self {
        Self {
            sessions,
            completion,
            templates,
            round_timeout: Duration::from_secs(120),
            title: "Streamchat".to_string(),
            static_dir: None,
        }
    }

    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout = timeout;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }
}
