//! Core data models shared between retrieval, the chat pipeline, and storage.

use serde::{Deserialize, Serialize};

/// A stored context document.
///
/// Documents are immutable once stored; the retrieval scorer only reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            text: text.into(),
        }
    }
}

/// A document (or live lookup answer) scored against a query.
///
/// Matches the `POST /api/retrieve` response item shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredResult {
    pub id: String,
    pub title: String,
    pub text: String,
    /// Number of distinct query terms shared with the document, or
    /// [`LIVE_SCORE`](crate::retrieval::LIVE_SCORE) for a live lookup answer.
    pub score: u32,
}

/// Author of a chat message.
///
/// `System` only ever appears in composed provider requests; stored
/// conversations hold `User` and `Assistant` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// An ordered, append-only exchange between a user and the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub model: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub mood: String,
}

/// Longest title derived from the first user message.
pub const TITLE_MAX_CHARS: usize = 60;

impl Conversation {
    /// Start an empty conversation titled after its opening prompt.
    pub fn new(
        id: impl Into<String>,
        first_prompt: &str,
        model: impl Into<String>,
        mood: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title_from(first_prompt),
            model: model.into(),
            messages: Vec::new(),
            mood: mood.into(),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }
}

/// Derive a conversation title: the first [`TITLE_MAX_CHARS`] characters
/// of the prompt, or `"Chat"` when the prompt is blank.
pub fn title_from(prompt: &str) -> String {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return "Chat".to_string();
    }
    trimmed.chars().take(TITLE_MAX_CHARS).collect()
}
