//! Live lookup against the DuckDuckGo Instant Answer API.
//!
//! Used to augment retrieval for queries about volatile information (see
//! [`needs_live_lookup`](olive_core::retrieval::needs_live_lookup)). The
//! lookup is best effort: callers treat any error or empty answer as
//! "no augmentation".

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use olive_core::retrieval::LiveAnswer;

use crate::config::LiveConfig;

/// Maximum number of related-topic snippets joined into one answer.
pub const MAX_TOPIC_SNIPPETS: usize = 5;

/// Answer returned by `POST /rag` when nothing useful was found.
pub const NOT_FOUND_TEXT: &str = "Tidak ditemukan informasi.";

/// A best-effort short-answer service: query in, short text (or nothing) out.
#[async_trait]
pub trait LiveLookup: Send + Sync {
    /// Look up `query`. `Ok(None)` means the service had nothing to say.
    async fn lookup(&self, query: &str) -> Result<Option<LiveAnswer>>;

    /// A one-line answer for `query`, or [`NOT_FOUND_TEXT`].
    async fn summarize(&self, query: &str) -> Result<String> {
        Ok(self
            .lookup(query)
            .await?
            .map(|answer| answer.text)
            .unwrap_or_else(|| NOT_FOUND_TEXT.to_string()))
    }
}

pub struct DuckDuckGo {
    client: reqwest::Client,
    endpoint: String,
}

impl DuckDuckGo {
    pub fn new(config: &LiveConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("olive-chat/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    /// Fetch the raw Instant Answer JSON for `query`.
    pub async fn instant_answer(&self, query: &str) -> Result<Value> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("no_redirect", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .context("live lookup request failed")?;

        let status = resp.status();
        if !status.is_success() {
            bail!("live lookup returned HTTP {}", status);
        }

        // The API serves `application/x-javascript`, so parse the body by hand.
        let body = resp.text().await?;
        serde_json::from_str(&body).context("live lookup returned invalid JSON")
    }
}

#[async_trait]
impl LiveLookup for DuckDuckGo {
    async fn lookup(&self, query: &str) -> Result<Option<LiveAnswer>> {
        let json = self.instant_answer(query).await?;
        Ok(extract_answer(&json))
    }

    async fn summarize(&self, query: &str) -> Result<String> {
        let json = self.instant_answer(query).await?;
        Ok(summary(&json))
    }
}

fn non_empty_str<'a>(json: &'a Value, field: &str) -> Option<&'a str> {
    json.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Build an answer from Instant Answer JSON.
///
/// Prefers `AbstractText`; otherwise joins up to [`MAX_TOPIC_SNIPPETS`]
/// `RelatedTopics[].Text` entries (descending one level into grouped
/// `Topics`) with blank lines.
pub fn extract_answer(json: &Value) -> Option<LiveAnswer> {
    let heading = non_empty_str(json, "Heading").map(str::to_string);

    if let Some(abstract_text) = non_empty_str(json, "AbstractText") {
        return Some(LiveAnswer {
            heading,
            text: abstract_text.to_string(),
        });
    }

    let mut snippets: Vec<&str> = Vec::new();
    if let Some(topics) = json.get("RelatedTopics").and_then(Value::as_array) {
        for topic in topics {
            if let Some(text) = non_empty_str(topic, "Text") {
                snippets.push(text);
            } else if let Some(group) = topic.get("Topics").and_then(Value::as_array) {
                snippets.extend(group.iter().filter_map(|sub| non_empty_str(sub, "Text")));
            }
            if snippets.len() >= MAX_TOPIC_SNIPPETS {
                break;
            }
        }
    }
    snippets.truncate(MAX_TOPIC_SNIPPETS);

    let text = snippets.join("\n\n");
    if text.trim().is_empty() {
        return None;
    }
    Some(LiveAnswer { heading, text })
}

/// One-line summary for `POST /rag`: the abstract, else the heading.
pub fn summary(json: &Value) -> String {
    non_empty_str(json, "AbstractText")
        .or_else(|| non_empty_str(json, "Heading"))
        .unwrap_or(NOT_FOUND_TEXT)
        .to_string()
}
