use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;

use super::{error_message, ChatCapability, ChatRequest, LineBuffer, TokenSink};
use crate::config::ProviderConfig;

/// Chat provider using a local Ollama instance's `/api/chat` endpoint.
///
/// Ollama streams newline-delimited JSON. Each line's `message.content`
/// is handed to the token callback; the line carrying `"done": true`
/// ends the reply.
pub struct OllamaChat {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl OllamaChat {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        // The read timeout bounds the gap between body reads, so a long
        // stream is not cut off. Whole-response timeouts are per request.
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response> {
        let body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "stream": stream,
        });

        let mut builder = self.client.post(format!("{}/api/chat", self.url)).json(&body);
        if !stream {
            builder = builder.timeout(self.timeout);
        }
        let response = builder
            .send()
            .await
            .with_context(|| format!("Ollama connection error (is Ollama running at {}?)", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatCapability for OllamaChat {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Value> {
        let json: Value = self.send(request, false).await?.json().await?;
        if let Some(message) = error_message(&json) {
            bail!("Ollama API error: {}", message);
        }
        json.pointer("/message/content")
            .and_then(Value::as_str)
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing message.content"))
    }

    fn supports_token_callback(&self) -> bool {
        true
    }

    async fn chat_with_callback(&self, request: &ChatRequest, on_token: TokenSink) -> Result<()> {
        let response = self.send(request, true).await?;
        let mut bytes = response.bytes_stream();
        let mut lines = LineBuffer::default();

        while let Some(piece) = bytes.next().await {
            let piece = piece.context("Ollama stream read failed")?;
            for line in lines.push(&piece) {
                if handle_line(&line, &on_token)? == LineOutcome::Done {
                    return Ok(());
                }
            }
        }
        if let Some(line) = lines.finish() {
            handle_line(&line, &on_token)?;
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum LineOutcome {
    More,
    Done,
}

/// Deliver one NDJSON line to `on_token`.
fn handle_line(line: &str, on_token: &TokenSink) -> Result<LineOutcome> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(LineOutcome::More);
    }
    let json: Value = serde_json::from_str(line).context("Invalid Ollama stream line")?;
    if let Some(message) = error_message(&json) {
        bail!("Ollama stream error: {}", message);
    }
    if let Some(content) = json.pointer("/message/content").and_then(Value::as_str) {
        if !content.is_empty() {
            on_token(Value::String(content.to_string()));
        }
    }
    if json.get("done").and_then(Value::as_bool).unwrap_or(false) {
        Ok(LineOutcome::Done)
    } else {
        Ok(LineOutcome::More)
    }
}
