//! Streamchat Library
//!
//! Core components for a server-rendered chat that streams LLM replies to the
//! browser over server-sent events.

pub mod api;
pub mod completion;
pub mod config;
pub mod markdown;
pub mod session;
pub mod stream;
pub mod templates;
