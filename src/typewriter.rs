//! Incremental reveal of assistant text.
//!
//! Producers push text through a [`TypewriterHandle`] as it arrives; one
//! background task moves it to the [`ChatView`] a few characters per tick.
//! The revealed text is always exactly the concatenation of everything
//! pushed, in push order, whatever the tick timing.

use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::TypewriterSettings;
use crate::view::ChatView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypewriterConfig {
    /// Characters revealed per tick.
    pub slice_chars: usize,
    pub tick: Duration,
}

impl Default for TypewriterConfig {
    fn default() -> Self {
        Self {
            slice_chars: 3,
            tick: Duration::from_millis(14),
        }
    }
}

impl From<&TypewriterSettings> for TypewriterConfig {
    fn from(settings: &TypewriterSettings) -> Self {
        Self {
            slice_chars: settings.slice_chars,
            tick: Duration::from_millis(settings.tick_ms),
        }
    }
}

enum Feed {
    Text(String),
    End,
}

/// Feeds a running [`Typewriter`]. Cheap to clone.
#[derive(Clone)]
pub struct TypewriterHandle {
    tx: mpsc::UnboundedSender<Feed>,
}

impl TypewriterHandle {
    pub fn push(&self, text: &str) {
        if !text.is_empty() {
            let _ = self.tx.send(Feed::Text(text.to_string()));
        }
    }

    /// No more text will follow; the reveal stops once the buffer drains.
    pub fn end(&self) {
        let _ = self.tx.send(Feed::End);
    }
}

pub struct Typewriter {
    handle: TypewriterHandle,
    task: JoinHandle<String>,
}

impl Typewriter {
    /// Spawn the reveal task. Must be called inside a tokio runtime.
    pub fn start(view: Arc<dyn ChatView>, config: TypewriterConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(reveal(view, config, rx));
        Self {
            handle: TypewriterHandle { tx },
            task,
        }
    }

    pub fn handle(&self) -> TypewriterHandle {
        self.handle.clone()
    }

    /// Wait for the reveal to complete and return the revealed text.
    ///
    /// Completes after [`TypewriterHandle::end`], or once every handle is
    /// dropped, and the buffer has drained.
    pub async fn finish(self) -> Result<String> {
        drop(self.handle);
        self.task.await.context("typewriter task failed")
    }
}

async fn reveal(
    view: Arc<dyn ChatView>,
    config: TypewriterConfig,
    mut rx: mpsc::UnboundedReceiver<Feed>,
) -> String {
    let slice_chars = config.slice_chars.max(1);
    let mut ticker = interval(config.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut buffer: VecDeque<char> = VecDeque::new();
    let mut revealed = String::new();
    let mut ended = false;

    loop {
        ticker.tick().await;

        loop {
            match rx.try_recv() {
                Ok(Feed::Text(text)) => buffer.extend(text.chars()),
                Ok(Feed::End) => ended = true,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    ended = true;
                    break;
                }
            }
        }

        if buffer.is_empty() {
            if ended {
                break;
            }
            continue;
        }

        let take = slice_chars.min(buffer.len());
        let slice: String = buffer.drain(..take).collect();
        view.append(&slice);
        revealed.push_str(&slice);
    }

    revealed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::TranscriptView;

    fn config(slice_chars: usize, tick_ms: u64) -> TypewriterConfig {
        TypewriterConfig {
            slice_chars,
            tick: Duration::from_millis(tick_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reveals_concatenation_in_slices() {
        let view = Arc::new(TranscriptView::new());
        let typewriter = Typewriter::start(view.clone(), config(3, 14));
        let handle = typewriter.handle();
        handle.push("Halo ");
        handle.push("dunia");
        handle.end();

        let text = typewriter.finish().await.unwrap();
        assert_eq!(text, "Halo dunia");

        let t = view.snapshot();
        assert_eq!(t.text, "Halo dunia");
        assert!(t.appends.iter().all(|a| a.chars().count() <= 3));
        assert_eq!(t.appends, vec!["Hal", "o d", "uni", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_kept_under_irregular_pushes() {
        let pieces = ["a", "", "bcdefg", "h", "ijklmnopq", "r", "stu"];
        for (slice, tick_ms) in [(1, 1), (3, 14), (5, 40), (100, 3)] {
            let view = Arc::new(TranscriptView::new());
            let typewriter = Typewriter::start(view.clone(), config(slice, tick_ms));
            let handle = typewriter.handle();

            for (i, piece) in pieces.iter().enumerate() {
                handle.push(piece);
                tokio::time::sleep(Duration::from_millis((i as u64 * 7) % 23)).await;
            }
            handle.end();
            drop(handle);

            let text = typewriter.finish().await.unwrap();
            assert_eq!(text, pieces.concat(), "slice={slice} tick={tick_ms}");
            assert_eq!(view.snapshot().text, pieces.concat());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_splits_multibyte_chars() {
        let view = Arc::new(TranscriptView::new());
        let typewriter = Typewriter::start(view.clone(), config(2, 14));
        let handle = typewriter.handle();
        handle.push("héllo 🌿 wörld");
        handle.end();

        assert_eq!(typewriter.finish().await.unwrap(), "héllo 🌿 wörld");
        assert!(view
            .snapshot()
            .appends
            .iter()
            .all(|a| a.chars().count() <= 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idles_until_text_arrives() {
        let view = Arc::new(TranscriptView::new());
        let typewriter = Typewriter::start(view.clone(), config(3, 14));
        let handle = typewriter.handle();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(view.snapshot().appends.is_empty());

        handle.push("late");
        handle.end();
        assert_eq!(typewriter.finish().await.unwrap(), "late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_handles_dropped() {
        let view = Arc::new(TranscriptView::new());
        let typewriter = Typewriter::start(view.clone(), TypewriterConfig::default());
        {
            let handle = typewriter.handle();
            handle.push("bye");
        }
        assert_eq!(typewriter.finish().await.unwrap(), "bye");
    }
}
