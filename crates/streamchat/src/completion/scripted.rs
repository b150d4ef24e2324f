//! Deterministic completion client.
//!
//! Replays a fixed list of fragments (or echoes the prompt back word by
//! word). Used by the test suite and by `serve --offline`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{Mutex, RwLock};

use super::client::{CompletionClient, FragmentStream};
use super::error::{CompletionError, CompletionResult};
use crate::session::ChatTurn;

#[derive(Debug, Clone)]
enum Reply {
    Fixed(Vec<String>),
    Echo,
}

#[derive(Debug, Clone)]
enum Failure {
    /// `stream` itself fails.
    Connect(String),
    /// The stream yields an error after the scripted fragments.
    MidStream(String),
}

/// A request seen by the scripted client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub system_prompt: Option<String>,
    pub history: Vec<ChatTurn>,
    pub prompt: String,
}

#[derive(Debug)]
pub struct ScriptedClient {
    reply: Reply,
    failure: Option<Failure>,
    delay: Option<Duration>,
    system_prompt: RwLock<Option<String>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedClient {
    /// Reply with exactly these fragments.
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_reply(Reply::Fixed(fragments.into_iter().map(Into::into).collect()))
    }

    /// Reply with the prompt, one word per fragment.
    pub fn echo() -> Self {
        Self::with_reply(Reply::Echo)
    }

    fn with_reply(reply: Reply) -> Self {
        Self {
            reply,
            failure: None,
            delay: None,
            system_prompt: RwLock::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fail before any fragment is produced.
    pub fn failing_to_connect(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(Failure::Connect(message.into()));
        self
    }

    /// Yield the scripted fragments, then fail.
    pub fn failing_after(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(Failure::MidStream(message.into()));
        self
    }

    /// Sleep before every fragment.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests received so far, oldest first.
    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().await.clone()
    }

    fn fragments_for(&self, prompt: &str) -> Vec<String> {
        match &self.reply {
            Reply::Fixed(fragments) => fragments.clone(),
            Reply::Echo => prompt.split_inclusive(' ').map(str::to_string).collect(),
        }
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn configure(&self, system_prompt: &str) {
        *self.system_prompt.write().await = Some(system_prompt.to_string());
    }

    async fn stream(&self, history: &[ChatTurn], prompt: &str) -> CompletionResult<FragmentStream> {
        self.requests.lock().await.push(RecordedRequest {
            system_prompt: self.system_prompt.read().await.clone(),
            history: history.to_vec(),
            prompt: prompt.to_string(),
        });

        let mut items: Vec<CompletionResult<String>> =
            self.fragments_for(prompt).into_iter().map(Ok).collect();
        match &self.failure {
            Some(Failure::Connect(message)) => {
                return Err(CompletionError::Upstream {
                    status: 503,
                    body: message.clone(),
                });
            }
            Some(Failure::MidStream(message)) => {
                items.push(Err(CompletionError::Stream(message.clone())));
            }
            None => {}
        }

        let delay = self.delay;
        let stream = futures::stream::iter(items).then(move |item| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            item
        });
        Ok(stream.boxed())
    }
}
