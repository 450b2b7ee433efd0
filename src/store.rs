//! SQLite-backed document and chat storage.
//!
//! Documents feed the retrieval scorer and are read in insertion order.
//! Chats are upserted per `(id, username)` pair; [`Store::history`]
//! returns a user's most recent conversations first. The table is capped
//! at [`MAX_STORED_CHATS`] rows, evicting the oldest.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use olive_core::models::{title_from, Conversation, Document, Message, Role};

use crate::config::Config;
use crate::db;

/// Upper bound on stored conversations across all users.
pub const MAX_STORED_CHATS: i64 = 1000;

/// A persisted conversation as returned by `GET /api/history/{username}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredChat {
    pub username: String,
    /// Last save time, epoch milliseconds.
    pub ts: i64,
    #[serde(flatten)]
    pub conversation: Conversation,
}

/// One entry of a document import file.
///
/// Accepts `text` or `content` for the body, and a string or numeric `id`.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentInput {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl DocumentInput {
    fn body(&self) -> Option<&str> {
        self.text
            .as_deref()
            .or(self.content.as_deref())
            .filter(|b| !b.trim().is_empty())
    }

    fn id_string(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        crate::migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }

    // ============ Documents ============

    /// Insert a document, generating an id when none is given.
    ///
    /// Re-inserting an existing id replaces its title and text but keeps
    /// its original position.
    pub async fn insert_document(&self, id: Option<&str>, title: &str, text: &str) -> Result<String> {
        let id = match id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("d_{}", uuid::Uuid::new_v4().simple()),
        };

        sqlx::query(
            r#"
            INSERT INTO documents (id, title, text, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                text = excluded.text
            "#,
        )
        .bind(&id)
        .bind(title)
        .bind(text)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// All documents, in insertion order.
    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query("SELECT id, title, text FROM documents ORDER BY seq ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| Document {
                id: row.get("id"),
                title: row.get("title"),
                text: row.get("text"),
            })
            .collect())
    }

    /// Load a JSON array of [`DocumentInput`] from `path`.
    ///
    /// Entries without a body are skipped. Returns the number stored.
    pub async fn import_documents(&self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read document file: {}", path.display()))?;
        let inputs: Vec<DocumentInput> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse document file: {}", path.display()))?;

        let mut stored = 0;
        for input in &inputs {
            let Some(body) = input.body() else {
                tracing::warn!(id = ?input.id, "skipping document without text");
                continue;
            };
            let id = input.id_string();
            self.insert_document(id.as_deref(), input.title.as_deref().unwrap_or(""), body)
                .await?;
            stored += 1;
        }
        Ok(stored)
    }

    // ============ Chats ============

    /// Insert or replace a conversation for `username`, stamping it now.
    ///
    /// Stamps are strictly increasing so saves within the same millisecond
    /// still order correctly in [`Store::history`].
    pub async fn save_chat(&self, username: &str, conversation: &Conversation) -> Result<()> {
        if username.trim().is_empty() {
            bail!("username required");
        }

        let title = if conversation.title.trim().is_empty() {
            let first_user = conversation
                .messages
                .iter()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.as_str())
                .unwrap_or("");
            title_from(first_user)
        } else {
            conversation.title.clone()
        };
        let messages_json = serde_json::to_string(&conversation.messages)?;
        let ts = chrono::Utc::now().timestamp_millis();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO chats (id, username, title, model, mood, messages_json, ts)
            VALUES (?, ?, ?, ?, ?, ?, MAX(?, (SELECT COALESCE(MAX(ts), 0) + 1 FROM chats)))
            ON CONFLICT(id, username) DO UPDATE SET
                title = excluded.title,
                model = excluded.model,
                mood = excluded.mood,
                messages_json = excluded.messages_json,
                ts = excluded.ts
            "#,
        )
        .bind(&conversation.id)
        .bind(username)
        .bind(&title)
        .bind(&conversation.model)
        .bind(&conversation.mood)
        .bind(&messages_json)
        .bind(ts)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM chats WHERE rowid NOT IN (
                SELECT rowid FROM chats ORDER BY ts DESC LIMIT ?
            )
            "#,
        )
        .bind(MAX_STORED_CHATS)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// The `limit` most recently saved conversations of `username`.
    pub async fn history(&self, username: &str, limit: i64) -> Result<Vec<StoredChat>> {
        let rows = sqlx::query(
            r#"
            SELECT id, username, title, model, mood, messages_json, ts
            FROM chats
            WHERE username = ?
            ORDER BY ts DESC
            LIMIT ?
            "#,
        )
        .bind(username)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut chats = Vec::with_capacity(rows.len());
        for row in rows {
            let messages_json: String = row.get("messages_json");
            let messages: Vec<Message> = serde_json::from_str(&messages_json)
                .with_context(|| "Corrupt messages_json in chats table")?;
            chats.push(StoredChat {
                username: row.get("username"),
                ts: row.get("ts"),
                conversation: Conversation {
                    id: row.get("id"),
                    title: row.get("title"),
                    model: row.get("model"),
                    mood: row.get("mood"),
                    messages,
                },
            });
        }
        Ok(chats)
    }

    /// Load one conversation of `username` by id.
    pub async fn get_chat(&self, username: &str, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, title, model, mood, messages_json FROM chats WHERE username = ? AND id = ?",
        )
        .bind(username)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let messages_json: String = row.get("messages_json");
        Ok(Some(Conversation {
            id: row.get("id"),
            title: row.get("title"),
            model: row.get("model"),
            mood: row.get("mood"),
            messages: serde_json::from_str(&messages_json)?,
        }))
    }
}
