use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;

use super::{error_message, ChatCapability, ChatRequest, ChunkStream, LineBuffer, StreamReply};
use crate::config::ProviderConfig;

/// Chat provider for OpenAI-compatible `/chat/completions` endpoints.
///
/// The API key is read from the environment variable named by
/// `[provider].api_key_env`. A missing key is not an error here, so
/// keyless local gateways work; the endpoint rejects the call instead.
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl OpenAiChat {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        // The read timeout bounds the gap between body reads, so a long
        // stream is not cut off. Whole-response timeouts are per request.
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(var = %config.api_key_env, "API key environment variable not set");
        }
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        })
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response> {
        let body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "stream": stream,
        });

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if !stream {
            builder = builder.timeout(self.timeout);
        }

        let response = builder.send().await.context("chat request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatCapability for OpenAiChat {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Value> {
        let json: Value = self.send(request, false).await?.json().await?;
        parse_completion(&json)
    }

    async fn chat_streaming(&self, request: &ChatRequest) -> Result<StreamReply> {
        let response = self.send(request, true).await?;
        let is_sse = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        // Some gateways ignore `stream: true` and answer with one JSON body.
        if !is_sse {
            let json: Value = response.json().await?;
            return Ok(StreamReply::Complete(parse_completion(&json)?));
        }
        Ok(StreamReply::Chunks(sse_chunks(response.bytes_stream())))
    }
}

/// Extract `choices[0].message.content` from a completion body.
fn parse_completion(json: &Value) -> Result<Value> {
    if let Some(message) = error_message(json) {
        bail!("OpenAI API error: {}", message);
    }
    json.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(|s| Value::String(s.to_string()))
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

/// One decoded server-sent event relevant to chat streaming.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Chunk(Value),
    Done,
}

/// Incremental decoder for the `data:` lines of an SSE body.
///
/// Comments, `event:`/`id:` fields, and blank lines are skipped. A
/// `data: [DONE]` line yields [`SseEvent::Done`]. Payloads that are not
/// JSON are logged and dropped.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    lines: LineBuffer,
}

impl SseLineDecoder {
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.lines
            .push(bytes)
            .iter()
            .filter_map(|line| parse_line(line))
            .collect()
    }

    /// Flush an unterminated final line.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        self.lines
            .finish()
            .and_then(|line| parse_line(&line))
            .into_iter()
            .collect()
    }
}

fn parse_line(line: &str) -> Option<SseEvent> {
    let payload = line.strip_prefix("data:")?.trim_start();
    if payload.is_empty() {
        return None;
    }
    if payload == "[DONE]" {
        return Some(SseEvent::Done);
    }
    match serde_json::from_str(payload) {
        Ok(value) => Some(SseEvent::Chunk(value)),
        Err(e) => {
            tracing::debug!(error = %e, "skipping non-JSON SSE payload");
            None
        }
    }
}

/// Adapt an SSE byte stream into a [`ChunkStream`] of JSON chunks.
fn sse_chunks<S, B>(bytes: S) -> ChunkStream
where
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    struct State<S> {
        bytes: std::pin::Pin<Box<S>>,
        decoder: SseLineDecoder,
        pending: VecDeque<Result<Value>>,
        done: bool,
    }

    impl<S> State<S> {
        fn queue(&mut self, events: Vec<SseEvent>) {
            for event in events {
                match event {
                    SseEvent::Chunk(value) => match error_message(&value) {
                        Some(message) => {
                            self.pending
                                .push_back(Err(anyhow!("OpenAI stream error: {}", message)));
                            self.done = true;
                            return;
                        }
                        None => self.pending.push_back(Ok(value)),
                    },
                    SseEvent::Done => {
                        self.done = true;
                        return;
                    }
                }
            }
        }
    }

    let state = State {
        bytes: Box::pin(bytes),
        decoder: SseLineDecoder::default(),
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(piece)) => {
                    let events = state.decoder.feed(piece.as_ref());
                    state.queue(events);
                }
                Some(Err(e)) => {
                    state.pending.push_back(Err(anyhow!("stream read failed: {}", e)));
                    state.done = true;
                }
                None => {
                    let events = state.decoder.finish();
                    state.queue(events);
                    state.done = true;
                }
            }
        }
    }))
}
