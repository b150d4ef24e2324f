//! Chat-completion providers.
//!
//! The [`CompletionClient`] trait hides the hosted LLM behind a streaming
//! interface. [`OpenAiClient`] talks to any OpenAI-compatible endpoint;
//! [`ScriptedClient`] replays canned fragments for tests and offline demos.

mod client;
mod error;
mod openai;
mod scripted;

pub use client::{CompletionClient, FragmentStream};
pub use error::{CompletionError, CompletionResult};
pub use openai::{OpenAiClient, OpenAiClientConfig};
pub use scripted::{RecordedRequest, ScriptedClient};
