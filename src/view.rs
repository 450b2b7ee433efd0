//! Display targets for a chat turn.
//!
//! A [`ChatView`] is where the typewriter reveals text and where the
//! negotiator toggles the "thinking" indicator. Three implementations:
//! - [`TerminalView`] prints to stdout for the `olive chat` REPL.
//! - [`ChannelView`] forwards [`ViewEvent`]s over a channel; the HTTP
//!   server turns them into SSE events.
//! - [`TranscriptView`] records everything in memory.

use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// A surface that shows one assistant reply as it is revealed.
pub trait ChatView: Send + Sync {
    /// Show or hide the "assistant is thinking" indicator.
    fn set_thinking(&self, thinking: bool);
    /// Append revealed text to the reply.
    fn append(&self, text: &str);
    /// Replace the whole reply (used for error bubbles).
    fn replace(&self, text: &str);
}

/// Everything a [`TranscriptView`] has been shown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub thinking: bool,
    /// Every `set_thinking` call, in order.
    pub thinking_changes: Vec<bool>,
    /// Every `append` call, in order.
    pub appends: Vec<String>,
    pub replaced: bool,
}

/// In-memory view; useful wherever the reply only needs collecting.
#[derive(Debug, Default)]
pub struct TranscriptView {
    state: Mutex<Transcript>,
}

impl TranscriptView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Transcript {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn with_state(&self, f: impl FnOnce(&mut Transcript)) {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard);
    }
}

impl ChatView for TranscriptView {
    fn set_thinking(&self, thinking: bool) {
        self.with_state(|s| {
            s.thinking = thinking;
            s.thinking_changes.push(thinking);
        });
    }

    fn append(&self, text: &str) {
        self.with_state(|s| {
            s.text.push_str(text);
            s.appends.push(text.to_string());
        });
    }

    fn replace(&self, text: &str) {
        self.with_state(|s| {
            s.text = text.to_string();
            s.replaced = true;
        });
    }
}

/// Writes the reply to stdout as it is revealed.
pub struct TerminalView {
    label: String,
}

const THINKING_TEXT: &str = "(thinking...)";

impl TerminalView {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ChatView for TerminalView {
    fn set_thinking(&self, thinking: bool) {
        let mut out = std::io::stdout().lock();
        if thinking {
            let _ = write!(out, "{}: {}", self.label, THINKING_TEXT);
        } else {
            // Overwrite the indicator with the label alone.
            let _ = write!(
                out,
                "\r{}: {}\r{}: ",
                self.label,
                " ".repeat(THINKING_TEXT.len()),
                self.label
            );
        }
        let _ = out.flush();
    }

    fn append(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = write!(out, "{}", text);
        let _ = out.flush();
    }

    fn replace(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = write!(out, "\n{}", text);
        let _ = out.flush();
    }
}

/// An event emitted by a [`ChannelView`], plus the end-of-turn summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ViewEvent {
    Thinking {
        thinking: bool,
    },
    Delta {
        text: String,
    },
    Replace {
        text: String,
    },
    Done {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        text: String,
        mode: String,
    },
}

impl ViewEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            ViewEvent::Thinking { .. } => "thinking",
            ViewEvent::Delta { .. } => "delta",
            ViewEvent::Replace { .. } => "replace",
            ViewEvent::Done { .. } => "done",
        }
    }
}

/// Forwards view updates over an unbounded channel.
///
/// Sends after the receiver is gone are dropped; a closed browser tab must
/// not fail the turn.
pub struct ChannelView {
    tx: mpsc::UnboundedSender<ViewEvent>,
}

impl ChannelView {
    pub fn new(tx: mpsc::UnboundedSender<ViewEvent>) -> Self {
        Self { tx }
    }
}

impl ChatView for ChannelView {
    fn set_thinking(&self, thinking: bool) {
        let _ = self.tx.send(ViewEvent::Thinking { thinking });
    }

    fn append(&self, text: &str) {
        let _ = self.tx.send(ViewEvent::Delta {
            text: text.to_string(),
        });
    }

    fn replace(&self, text: &str) {
        let _ = self.tx.send(ViewEvent::Replace {
            text: text.to_string(),
        });
    }
}
