//! Chat provider abstraction and HTTP implementations.
//!
//! Defines the [`ChatCapability`] trait, which models the three ways a
//! hosted chat endpoint may answer:
//! - a complete value ([`ChatCapability::chat`]),
//! - an async sequence of raw chunks ([`ChatCapability::chat_streaming`] or
//!   [`ChatCapability::chat_stream`]),
//! - a callback invoked once per token ([`ChatCapability::chat_with_callback`]).
//!
//! Which of these a provider actually supports is discovered at runtime by
//! [`probe`](crate::negotiate::probe). Chunks are raw JSON values; turning
//! them into text is the job of [`normalize`](olive_core::chunk::normalize).
//!
//! Concrete providers:
//! - **[`OpenAiChat`]**: any OpenAI-compatible `/chat/completions` endpoint,
//!   streamed over server-sent events.
//! - **[`OllamaChat`]**: a local Ollama instance, streamed as NDJSON tokens
//!   through the callback convention.
//!
//! Use [`create_provider`] to build the configured one.

mod ollama;
mod openai;

pub use ollama::OllamaChat;
pub use openai::{OpenAiChat, SseEvent, SseLineDecoder};

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;

use olive_core::models::Message;

use crate::config::ProviderConfig;

/// A sequence of raw provider chunks. An `Err` item ends the response.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Value>> + Send>>;

/// Receives one raw chunk per token in callback mode.
pub type TokenSink = Arc<dyn Fn(Value) + Send + Sync>;

/// One chat completion request: the model and the full message list,
/// system instruction first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
}

/// What a call in streaming form handed back.
pub enum StreamReply {
    /// The provider streams; chunks follow.
    Chunks(ChunkStream),
    /// The provider ignored the streaming request and answered in full.
    Complete(Value),
}

/// A conversational AI endpoint whose response conventions are not known
/// ahead of time.
#[async_trait]
pub trait ChatCapability: Send + Sync {
    /// Short provider identifier used in logs (e.g. `"openai"`).
    fn name(&self) -> &str;

    /// Request a complete, non-streaming reply.
    async fn chat(&self, request: &ChatRequest) -> Result<Value>;

    /// The regular call form with streaming requested.
    async fn chat_streaming(&self, _request: &ChatRequest) -> Result<StreamReply> {
        bail!("{} does not stream through its chat call", self.name())
    }

    /// A dedicated streaming entry point. `None` when the provider has none.
    async fn chat_stream(&self, _request: &ChatRequest) -> Result<Option<ChunkStream>> {
        Ok(None)
    }

    /// Whether [`chat_with_callback`](Self::chat_with_callback) is available.
    fn supports_token_callback(&self) -> bool {
        false
    }

    /// Stream by invoking `on_token` once per raw chunk, returning when the
    /// reply is complete.
    async fn chat_with_callback(&self, _request: &ChatRequest, _on_token: TokenSink) -> Result<()> {
        bail!("{} does not support token callbacks", self.name())
    }
}

/// Create the chat provider named by `[provider].kind`.
///
/// # Errors
///
/// Returns an error for an unknown kind, or when the HTTP client cannot be
/// built.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn ChatCapability>> {
    match config.kind.as_str() {
        "openai" => Ok(Arc::new(OpenAiChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        other => bail!("Unknown provider kind: {}", other),
    }
}

/// Splits an HTTP body arriving in arbitrary byte pieces into lines.
///
/// Lines are split on `\n`, a trailing `\r` is dropped, and a line is only
/// decoded once complete, so multi-byte characters split across pieces
/// survive.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append `bytes` and return every line completed by them.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&line[..line.len() - 1]));
        }
        lines
    }

    /// The unterminated last line, if any.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Turn a provider's `{"error": ...}` payload into an error message.
pub(crate) fn error_message(json: &Value) -> Option<String> {
    let error = json.get("error")?;
    match error {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(
            other
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        ),
    }
}
