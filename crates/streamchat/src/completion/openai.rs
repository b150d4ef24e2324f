//! OpenAI-compatible streaming client.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest_eventsource::{Event, EventSource, retry};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::client::{CompletionClient, FragmentStream};
use super::error::{CompletionError, CompletionResult};
use crate::session::ChatTurn;

/// Marker the provider sends as the last event data.
const DONE_MARKER: &str = "[DONE]";

/// Settings for [`OpenAiClient`].
#[derive(Debug, Clone)]
pub struct OpenAiClientConfig {
    pub api_key: String,
    /// API root, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub connect_timeout: Duration,
}

impl OpenAiClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Client for `/chat/completions` with `stream: true`.
#[derive(Debug)]
pub struct OpenAiClient {
    client: Client,
    endpoint: String,
    model: String,
    temperature: Option<f32>,
    system_prompt: RwLock<Option<String>>,
}

impl OpenAiClient {
    pub fn new(config: OpenAiClientConfig) -> CompletionResult<Self> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| CompletionError::InvalidRequest("API key is not a valid header".into()))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model,
            temperature: config.temperature,
            system_prompt: RwLock::new(None),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn build_request(&self, history: &[ChatTurn], prompt: &str) -> ChatRequest {
        let system_prompt = self.system_prompt.read().await.clone();
        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(system) = system_prompt {
            messages.push(WireMessage {
                role: "system".to_string(),
                content: system,
            });
        }
        messages.extend(history.iter().map(|turn| WireMessage {
            role: turn.role.to_string(),
            content: turn.text.clone(),
        }));
        messages.push(WireMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        ChatRequest {
            model: self.model.clone(),
            messages,
            stream: true,
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn configure(&self, system_prompt: &str) {
        let value = Some(system_prompt.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        *self.system_prompt.write().await = value;
    }

    async fn stream(&self, history: &[ChatTurn], prompt: &str) -> CompletionResult<FragmentStream> {
        let body = self.build_request(history, prompt).await;
        debug!(
            endpoint = %self.endpoint,
            model = %self.model,
            turns = body.messages.len(),
            "Opening completion stream"
        );

        let request = self.client.post(&self.endpoint).json(&body);
        let mut source =
            EventSource::new(request).map_err(|e| CompletionError::InvalidRequest(e.to_string()))?;
        source.set_retry_policy(Box::new(retry::Never));

        let fragments = futures::stream::unfold(Some(source), |state| async move {
            let mut source = state?;
            loop {
                match source.next().await {
                    None | Some(Err(reqwest_eventsource::Error::StreamEnded)) => {
                        source.close();
                        warn!("Completion stream ended before {DONE_MARKER}");
                        return Some((Err(truncated()), None));
                    }
                    Some(Ok(Event::Open)) => continue,
                    Some(Ok(Event::Message(message))) => {
                        if message.data.trim() == DONE_MARKER {
                            source.close();
                            return None;
                        }
                        match parse_chunk(&message.data) {
                            Ok(Some(text)) => return Some((Ok(text), Some(source))),
                            Ok(None) => continue,
                            Err(err) => {
                                source.close();
                                return Some((Err(err), None));
                            }
                        }
                    }
                    Some(Err(err)) => {
                        source.close();
                        let err = map_source_error(err).await;
                        warn!(error = %err, "Completion stream failed");
                        return Some((Err(err), None));
                    }
                }
            }
        });

        Ok(fragments.boxed())
    }
}

/// The provider closed the body without sending the done marker.
fn truncated() -> CompletionError {
    CompletionError::Stream(format!("stream ended before {DONE_MARKER}"))
}

/// Extract the content delta from one streamed chunk.
fn parse_chunk(data: &str) -> CompletionResult<Option<String>> {
    let chunk: ChatChunk =
        serde_json::from_str(data).map_err(|e| CompletionError::Parse(e.to_string()))?;

    if let Some(error) = chunk.error {
        return Err(CompletionError::Stream(error.to_string()));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

async fn map_source_error(err: reqwest_eventsource::Error) -> CompletionError {
    use reqwest_eventsource::Error;

    match err {
        Error::InvalidStatusCode(status, response) => CompletionError::Upstream {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        },
        Error::Transport(err) => CompletionError::RequestFailed(err),
        other => CompletionError::Stream(other.to_string()),
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}
