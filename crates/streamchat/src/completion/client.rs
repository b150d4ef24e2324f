//! Completion client trait.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;

use super::error::CompletionResult;
use crate::session::ChatTurn;

/// Lazy, single-pass sequence of reply fragments in emission order.
///
/// An `Err` item ends the sequence. Fragments yielded before it stay valid.
pub type FragmentStream = BoxStream<'static, CompletionResult<String>>;

/// A chat-completion backend.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Set the system prompt sent ahead of the conversation.
    async fn configure(&self, system_prompt: &str);

    /// Start a streaming completion for `prompt` following `history`.
    ///
    /// `history` holds the turns before this prompt; the prompt itself is sent
    /// as the final user message.
    async fn stream(&self, history: &[ChatTurn], prompt: &str) -> CompletionResult<FragmentStream>;

    /// Single-shot completion. Equals the concatenation of [`Self::stream`].
    async fn complete(&self, history: &[ChatTurn], prompt: &str) -> CompletionResult<String> {
        let mut fragments = self.stream(history, prompt).await?;
        let mut reply = String::new();
        while let Some(fragment) = fragments.next().await {
            reply.push_str(&fragment?);
        }
        Ok(reply)
    }
}
