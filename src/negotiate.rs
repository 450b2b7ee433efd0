//! Response-protocol negotiation for one assistant turn.
//!
//! A provider may stream through its regular call, through a dedicated
//! streaming call, through a per-token callback, or not at all. The
//! [`Negotiator`] discovers which by [`probe`], feeds whatever arrives to
//! a [`Typewriter`], and falls back to a single non-streaming call when
//! streaming is unavailable, produces nothing, or stays silent past the
//! no-activity deadline.
//!
//! Exactly one path produces output per turn. The streaming consumer and
//! the deadline race to claim an [`OutputGate`]; whichever loses never
//! pushes text.
//!
//! ```text
//!  turn start ──► probe ──► Stream / Callback ──► first chunk claims gate ──► reveal ──► end
//!      │                         │ (empty, failed, Unavailable)
//!      │                         ▼
//!      └── deadline ──► claims gate ──► chat() ──► fallback_text ──► reveal ──► end
//! ```

use anyhow::Result;
use futures::StreamExt;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

use olive_core::chunk::{fallback_text, normalize};

use crate::provider::{ChatCapability, ChatRequest, ChunkStream, StreamReply, TokenSink};
use crate::typewriter::{Typewriter, TypewriterConfig, TypewriterHandle};
use crate::view::ChatView;

/// How the final text of a turn was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Chunks from an async sequence.
    Stream,
    /// Tokens delivered through a callback.
    Callback,
    /// One non-streaming call.
    Fallback,
    /// Every mode failed; the text is the error bubble.
    Failed,
}

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::Stream => "stream",
            ResponseMode::Callback => "callback",
            ResponseMode::Fallback => "fallback",
            ResponseMode::Failed => "failed",
        }
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub mode: ResponseMode,
    /// The text the view ended up showing.
    pub text: String,
}

/// The path allowed to write a turn's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputPath {
    Stream = 1,
    Fallback = 2,
}

/// Single-assignment cell recording which [`OutputPath`] won the turn.
#[derive(Debug, Default)]
pub struct OutputGate(AtomicU8);

const UNCLAIMED: u8 = 0;

impl OutputGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the gate for `path`. Returns `true` if `path` holds it,
    /// whether it was claimed now or earlier.
    pub fn claim(&self, path: OutputPath) -> bool {
        match self
            .0
            .compare_exchange(UNCLAIMED, path as u8, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current == path as u8,
        }
    }

    pub fn winner(&self) -> Option<OutputPath> {
        match self.0.load(Ordering::Acquire) {
            1 => Some(OutputPath::Stream),
            2 => Some(OutputPath::Fallback),
            _ => None,
        }
    }

    pub fn is_held_by(&self, path: OutputPath) -> bool {
        self.winner() == Some(path)
    }
}

/// Clears the thinking indicator at most once per turn.
struct ThinkingGuard(AtomicBool);

impl ThinkingGuard {
    fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    fn clear(&self, view: &dyn ChatView) {
        if !self.0.swap(true, Ordering::AcqRel) {
            view.set_thinking(false);
        }
    }
}

/// Aborts a spawned task when dropped.
pub struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Result of probing a provider for a streaming convention.
pub enum Probe {
    Stream(ChunkStream),
    /// Tokens from a running callback call. Dropping `call` cancels it.
    Callback { chunks: ChunkStream, call: AbortOnDrop },
    Unavailable,
}

/// Try each streaming convention in order and return the first that works.
///
/// 1. the regular call with streaming requested,
/// 2. the dedicated streaming call,
/// 3. the token-callback call, when the provider advertises one.
///
/// Failures are logged and move on to the next form.
pub async fn probe(capability: &Arc<dyn ChatCapability>, request: &ChatRequest) -> Probe {
    let provider = capability.name();

    match capability.chat_streaming(request).await {
        Ok(StreamReply::Chunks(chunks)) => return Probe::Stream(chunks),
        Ok(StreamReply::Complete(_)) => {
            tracing::debug!(provider, "streaming call answered without a stream");
        }
        Err(e) => tracing::debug!(provider, error = %e, "streaming call unavailable"),
    }

    match capability.chat_stream(request).await {
        Ok(Some(chunks)) => return Probe::Stream(chunks),
        Ok(None) => {}
        Err(e) => tracing::debug!(provider, error = %e, "stream call unavailable"),
    }

    if capability.supports_token_callback() {
        let (tx, rx) = mpsc::unbounded_channel::<Result<serde_json::Value>>();
        let capability = Arc::clone(capability);
        let request = request.clone();

        let call = tokio::spawn(async move {
            let token_tx = tx.clone();
            let sink: TokenSink = Arc::new(move |token| {
                let _ = token_tx.send(Ok(token));
            });
            if let Err(e) = capability.chat_with_callback(&request, sink).await {
                let _ = tx.send(Err(e));
            }
        });

        return Probe::Callback {
            chunks: Box::pin(UnboundedReceiverStream::new(rx)),
            call: AbortOnDrop(call),
        };
    }

    Probe::Unavailable
}

enum Consumed {
    /// Output was produced through `mode`; the typewriter has been ended.
    Streamed(ResponseMode),
    /// No chunk was ever accepted.
    NotStarted,
}

/// Drives one assistant turn through whichever protocol the provider offers.
#[derive(Debug, Clone)]
pub struct Negotiator {
    no_token_timeout: Duration,
    typewriter: TypewriterConfig,
}

impl Negotiator {
    pub fn new(no_token_timeout: Duration, typewriter: TypewriterConfig) -> Self {
        Self {
            no_token_timeout,
            typewriter,
        }
    }

    /// Run one turn to completion. Never fails: if every mode fails, the
    /// view shows `Error: <message>` and the outcome carries that text.
    pub async fn run(
        &self,
        capability: Arc<dyn ChatCapability>,
        request: ChatRequest,
        view: Arc<dyn ChatView>,
    ) -> TurnOutcome {
        view.set_thinking(true);

        let deadline = tokio::time::sleep(self.no_token_timeout);
        tokio::pin!(deadline);

        let typewriter = Typewriter::start(Arc::clone(&view), self.typewriter);
        let gate = Arc::new(OutputGate::new());
        let thinking = Arc::new(ThinkingGuard::new());

        let mut consumer = tokio::spawn(consume(
            Arc::clone(&capability),
            request.clone(),
            Arc::clone(&gate),
            typewriter.handle(),
            Arc::clone(&view),
            Arc::clone(&thinking),
        ));

        let mut armed = true;
        let consumed = loop {
            tokio::select! {
                joined = &mut consumer => {
                    break joined.unwrap_or_else(|e| {
                        tracing::warn!(error = %e, "stream consumer task failed");
                        Consumed::NotStarted
                    });
                }
                _ = &mut deadline, if armed => {
                    armed = false;
                    if gate.claim(OutputPath::Fallback) {
                        consumer.abort();
                        tracing::info!(
                            timeout_ms = self.no_token_timeout.as_millis() as u64,
                            "no tokens before deadline; falling back to a single call"
                        );
                        break Consumed::NotStarted;
                    }
                }
            }
        };

        let handle = typewriter.handle();
        let mut failure = None;
        let mode = match consumed {
            Consumed::Streamed(mode) => mode,
            Consumed::NotStarted if !gate.claim(OutputPath::Fallback) => {
                // The stream had started before its task died.
                handle.end();
                ResponseMode::Stream
            }
            Consumed::NotStarted => match fallback(&capability, &request, &handle).await {
                Ok(()) => ResponseMode::Fallback,
                Err(e) => {
                    tracing::warn!(provider = capability.name(), error = %e, "all response modes failed");
                    handle.end();
                    failure = Some(e);
                    ResponseMode::Failed
                }
            },
        };
        drop(handle);

        thinking.clear(view.as_ref());
        let revealed = match typewriter.finish().await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "typewriter did not finish cleanly");
                String::new()
            }
        };

        let text = match failure {
            Some(e) => {
                let message = format!("Error: {}", e);
                view.replace(&message);
                message
            }
            None => revealed,
        };

        tracing::debug!(mode = %mode, chars = text.chars().count(), "turn complete");
        TurnOutcome { mode, text }
    }
}

/// Probe the provider and feed every chunk it yields to the typewriter.
async fn consume(
    capability: Arc<dyn ChatCapability>,
    request: ChatRequest,
    gate: Arc<OutputGate>,
    typewriter: TypewriterHandle,
    view: Arc<dyn ChatView>,
    thinking: Arc<ThinkingGuard>,
) -> Consumed {
    let (mode, mut chunks, _call) = match probe(&capability, &request).await {
        Probe::Stream(chunks) => (ResponseMode::Stream, chunks, None),
        Probe::Callback { chunks, call } => (ResponseMode::Callback, chunks, Some(call)),
        Probe::Unavailable => {
            tracing::debug!(provider = capability.name(), "no streaming convention available");
            return Consumed::NotStarted;
        }
    };

    let mut started = false;
    while let Some(item) = chunks.next().await {
        let raw = match item {
            Ok(raw) => raw,
            Err(e) if started => {
                tracing::warn!(error = %e, "stream ended with an error; keeping partial reply");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "stream failed before the first chunk");
                return Consumed::NotStarted;
            }
        };

        if !started {
            if !gate.claim(OutputPath::Stream) {
                return Consumed::NotStarted;
            }
            started = true;
            tracing::debug!(mode = %mode, "first chunk received");
            thinking.clear(view.as_ref());
        } else if !gate.is_held_by(OutputPath::Stream) {
            return Consumed::NotStarted;
        }

        typewriter.push(&normalize(&raw));
    }

    if !started {
        tracing::debug!(mode = %mode, "stream completed without chunks");
        return Consumed::NotStarted;
    }
    typewriter.end();
    Consumed::Streamed(mode)
}

/// One non-streaming call, revealed as a single chunk.
async fn fallback(
    capability: &Arc<dyn ChatCapability>,
    request: &ChatRequest,
    typewriter: &TypewriterHandle,
) -> Result<()> {
    let reply = capability.chat(request).await?;
    typewriter.push(&fallback_text(&reply));
    typewriter.end();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::TranscriptView;
    use anyhow::bail;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;

    const TIMEOUT: Duration = Duration::from_millis(18_000);

    fn negotiator() -> Negotiator {
        Negotiator::new(TIMEOUT, TypewriterConfig::default())
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "gpt-4.1-nano".into(),
            messages: vec![olive_core::models::Message::user("halo")],
        }
    }

    fn chunk_stream(chunks: Vec<Value>) -> ChunkStream {
        Box::pin(futures::stream::iter(
            chunks.into_iter().map(Ok::<Value, anyhow::Error>),
        ))
    }

    #[derive(Default)]
    struct Calls {
        chat: AtomicUsize,
    }

    /// Streams OpenAI-style deltas through the regular call.
    struct StreamingProvider {
        calls: Calls,
    }

    #[async_trait]
    impl ChatCapability for StreamingProvider {
        fn name(&self) -> &str {
            "streaming"
        }
        async fn chat(&self, _request: &ChatRequest) -> Result<Value> {
            self.calls.chat.fetch_add(1, Ordering::SeqCst);
            Ok(json!("should not be used"))
        }
        async fn chat_streaming(&self, _request: &ChatRequest) -> Result<StreamReply> {
            Ok(StreamReply::Chunks(chunk_stream(vec![
                json!({"choices": [{"delta": {"content": "Halo, "}}]}),
                json!({"delta": "apa "}),
                json!("kabar?"),
                json!({"unknown": true}),
            ])))
        }
    }

    /// Only offers the token-callback convention.
    struct CallbackProvider;

    #[async_trait]
    impl ChatCapability for CallbackProvider {
        fn name(&self) -> &str {
            "callback"
        }
        async fn chat(&self, _request: &ChatRequest) -> Result<Value> {
            bail!("sync path must not run")
        }
        fn supports_token_callback(&self) -> bool {
            true
        }
        async fn chat_with_callback(&self, _request: &ChatRequest, on_token: TokenSink) -> Result<()> {
            for token in ["Sel", "amat ", "pagi"] {
                tokio::time::sleep(Duration::from_millis(50)).await;
                on_token(json!({"token": token}));
            }
            Ok(())
        }
    }

    /// Every streaming form errors; the sync call works.
    struct SyncOnlyProvider;

    #[async_trait]
    impl ChatCapability for SyncOnlyProvider {
        fn name(&self) -> &str {
            "sync"
        }
        async fn chat(&self, _request: &ChatRequest) -> Result<Value> {
            Ok(json!({"text": "Jawaban lengkap."}))
        }
        async fn chat_streaming(&self, _request: &ChatRequest) -> Result<StreamReply> {
            bail!("stream refused")
        }
        async fn chat_stream(&self, _request: &ChatRequest) -> Result<Option<ChunkStream>> {
            bail!("no stream endpoint")
        }
    }

    /// Streams nothing until long after the deadline.
    struct SilentProvider {
        calls: Calls,
    }

    #[async_trait]
    impl ChatCapability for SilentProvider {
        fn name(&self) -> &str {
            "silent"
        }
        async fn chat(&self, _request: &ChatRequest) -> Result<Value> {
            self.calls.chat.fetch_add(1, Ordering::SeqCst);
            Ok(json!("Maaf, terlambat."))
        }
        async fn chat_streaming(&self, _request: &ChatRequest) -> Result<StreamReply> {
            let late = futures::stream::once(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<Value, anyhow::Error>(json!("too late"))
            });
            Ok(StreamReply::Chunks(Box::pin(late)))
        }
    }

    /// Nothing works at all.
    struct BrokenProvider;

    #[async_trait]
    impl ChatCapability for BrokenProvider {
        fn name(&self) -> &str {
            "broken"
        }
        async fn chat(&self, _request: &ChatRequest) -> Result<Value> {
            bail!("service unavailable")
        }
    }

    async fn run(capability: Arc<dyn ChatCapability>) -> (TurnOutcome, Arc<TranscriptView>) {
        let view = Arc::new(TranscriptView::new());
        let outcome = negotiator().run(capability, request(), view.clone()).await;
        (outcome, view)
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_stream_provider() {
        let provider = Arc::new(StreamingProvider {
            calls: Calls::default(),
        });
        let (outcome, view) = run(provider.clone()).await;

        assert_eq!(outcome.mode, ResponseMode::Stream);
        assert_eq!(outcome.text, "Halo, apa kabar?");
        assert_eq!(view.snapshot().text, "Halo, apa kabar?");
        assert_eq!(view.snapshot().thinking_changes, vec![true, false]);
        assert_eq!(provider.calls.chat.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_only_provider() {
        let (outcome, view) = run(Arc::new(CallbackProvider)).await;

        assert_eq!(outcome.mode, ResponseMode::Callback);
        assert_eq!(outcome.text, "Selamat pagi");
        assert_eq!(view.snapshot().text, "Selamat pagi");
        assert_eq!(view.snapshot().thinking_changes, vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_errors_fall_back_to_sync() {
        let (outcome, view) = run(Arc::new(SyncOnlyProvider)).await;

        assert_eq!(outcome.mode, ResponseMode::Fallback);
        assert_eq!(outcome.text, "Jawaban lengkap.");
        assert_eq!(view.snapshot().text, "Jawaban lengkap.");
    }

    /// Streams the given items, counting sync calls.
    struct ScriptedStream {
        items: Vec<std::result::Result<&'static str, &'static str>>,
        calls: Calls,
    }

    #[async_trait]
    impl ChatCapability for ScriptedStream {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn chat(&self, _request: &ChatRequest) -> Result<Value> {
            self.calls.chat.fetch_add(1, Ordering::SeqCst);
            Ok(json!("Jawaban cadangan."))
        }
        async fn chat_streaming(&self, _request: &ChatRequest) -> Result<StreamReply> {
            let items: Vec<Result<Value>> = self
                .items
                .iter()
                .map(|item| match item {
                    Ok(text) => Ok(json!(text)),
                    Err(message) => Err(anyhow::anyhow!(*message)),
                })
                .collect();
            Ok(StreamReply::Chunks(Box::pin(futures::stream::iter(items))))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_error_before_first_chunk_falls_back() {
        let provider = Arc::new(ScriptedStream {
            items: vec![Err("connection reset")],
            calls: Calls::default(),
        });
        let started = tokio::time::Instant::now();
        let (outcome, view) = run(provider.clone()).await;

        assert_eq!(outcome.mode, ResponseMode::Fallback);
        assert_eq!(outcome.text, "Jawaban cadangan.");
        assert_eq!(view.snapshot().text, "Jawaban cadangan.");
        assert_eq!(provider.calls.chat.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_error_after_first_chunk_keeps_partial_reply() {
        let provider = Arc::new(ScriptedStream {
            items: vec![Ok("Sebagian "), Ok("jawaban"), Err("connection reset"), Ok("hilang")],
            calls: Calls::default(),
        });
        let (outcome, view) = run(provider.clone()).await;

        assert_eq!(outcome.mode, ResponseMode::Stream);
        assert_eq!(outcome.text, "Sebagian jawaban");
        assert_eq!(view.snapshot().text, "Sebagian jawaban");
        assert!(!view.snapshot().replaced);
        assert_eq!(provider.calls.chat.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_error_before_first_token_falls_back() {
        struct FailingCallback {
            calls: Calls,
        }

        #[async_trait]
        impl ChatCapability for FailingCallback {
            fn name(&self) -> &str {
                "failing-callback"
            }
            async fn chat(&self, _request: &ChatRequest) -> Result<Value> {
                self.calls.chat.fetch_add(1, Ordering::SeqCst);
                Ok(json!("Dari panggilan biasa."))
            }
            fn supports_token_callback(&self) -> bool {
                true
            }
            async fn chat_with_callback(&self, _request: &ChatRequest, _on_token: TokenSink) -> Result<()> {
                bail!("callback endpoint down")
            }
        }

        let provider = Arc::new(FailingCallback {
            calls: Calls::default(),
        });
        let (outcome, view) = run(provider.clone()).await;

        assert_eq!(outcome.mode, ResponseMode::Fallback);
        assert_eq!(outcome.text, "Dari panggilan biasa.");
        assert_eq!(view.snapshot().text, "Dari panggilan biasa.");
        assert_eq!(provider.calls.chat.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_past_deadline_falls_back_once() {
        let provider = Arc::new(SilentProvider {
            calls: Calls::default(),
        });
        let started = tokio::time::Instant::now();
        let (outcome, view) = run(provider.clone()).await;

        assert_eq!(outcome.mode, ResponseMode::Fallback);
        assert_eq!(outcome.text, "Maaf, terlambat.");
        assert_eq!(provider.calls.chat.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() >= TIMEOUT);
        assert!(started.elapsed() < Duration::from_secs(60));

        // The late chunk never reaches the view.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(view.snapshot().text, "Maaf, terlambat.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_stream_falls_back_immediately() {
        struct EmptyStream;

        #[async_trait]
        impl ChatCapability for EmptyStream {
            fn name(&self) -> &str {
                "empty"
            }
            async fn chat(&self, _request: &ChatRequest) -> Result<Value> {
                Ok(Value::Null)
            }
            async fn chat_streaming(&self, _request: &ChatRequest) -> Result<StreamReply> {
                Ok(StreamReply::Chunks(chunk_stream(vec![])))
            }
        }

        let started = tokio::time::Instant::now();
        let (outcome, _view) = run(Arc::new(EmptyStream)).await;
        assert_eq!(outcome.mode, ResponseMode::Fallback);
        assert_eq!(outcome.text, "");
        assert!(started.elapsed() < TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_mode_failing_shows_error() {
        let (outcome, view) = run(Arc::new(BrokenProvider)).await;

        assert_eq!(outcome.mode, ResponseMode::Failed);
        assert_eq!(outcome.text, "Error: service unavailable");
        let t = view.snapshot();
        assert!(t.replaced);
        assert_eq!(t.text, "Error: service unavailable");
        assert!(!t.thinking);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_started_before_deadline_is_not_interrupted() {
        struct SlowStream;

        #[async_trait]
        impl ChatCapability for SlowStream {
            fn name(&self) -> &str {
                "slow"
            }
            async fn chat(&self, _request: &ChatRequest) -> Result<Value> {
                bail!("fallback must not run")
            }
            async fn chat_streaming(&self, _request: &ChatRequest) -> Result<StreamReply> {
                let chunks = futures::stream::iter(["satu ", "dua ", "tiga"]).then(|piece| async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<Value, anyhow::Error>(json!(piece))
                });
                Ok(StreamReply::Chunks(Box::pin(chunks)))
            }
        }

        let (outcome, view) = run(Arc::new(SlowStream)).await;
        assert_eq!(outcome.mode, ResponseMode::Stream);
        assert_eq!(outcome.text, "satu dua tiga");
        assert!(!view.snapshot().replaced);
    }

    #[test]
    fn test_output_gate_single_assignment() {
        let gate = OutputGate::new();
        assert_eq!(gate.winner(), None);
        assert!(gate.claim(OutputPath::Stream));
        assert!(gate.claim(OutputPath::Stream));
        assert!(!gate.claim(OutputPath::Fallback));
        assert!(gate.is_held_by(OutputPath::Stream));
        assert_eq!(gate.winner(), Some(OutputPath::Stream));
    }

    #[tokio::test]
    async fn test_probe_order() {
        let streaming: Arc<dyn ChatCapability> = Arc::new(StreamingProvider {
            calls: Calls::default(),
        });
        assert!(matches!(probe(&streaming, &request()).await, Probe::Stream(_)));

        let callback: Arc<dyn ChatCapability> = Arc::new(CallbackProvider);
        assert!(matches!(probe(&callback, &request()).await, Probe::Callback { .. }));

        let sync: Arc<dyn ChatCapability> = Arc::new(SyncOnlyProvider);
        assert!(matches!(probe(&sync, &request()).await, Probe::Unavailable));
    }
}
