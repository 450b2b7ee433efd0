//! Term-overlap retrieval scoring and the live-lookup policy.
//!
//! # Scoring
//!
//! 1. Tokenize the query; an empty term set yields no results.
//! 2. Score each document by the number of distinct terms it shares with
//!    the query (set-overlap cardinality, not term frequency).
//! 3. Drop documents scoring 0.
//! 4. Sort by score descending. The sort is stable, so ties keep the
//!    original document order.
//! 5. Truncate to `top_k`.
//!
//! # Live lookup
//!
//! [`needs_live_lookup`] flags queries asking for volatile information
//! (dates, times, "today/now", current office holders, weather, news).
//! The caller performs the lookup and passes the answer to
//! [`merge_live`], which prepends it with [`LIVE_SCORE`] so it outranks
//! every local result. Local and live results are never deduplicated
//! against each other.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::{Document, ScoredResult};
use crate::tokenize::tokenize;

/// Default number of local documents returned per query.
pub const DEFAULT_TOP_K: usize = 3;

/// Sentinel score attached to live lookup answers.
pub const LIVE_SCORE: u32 = u32::MAX;

/// Identifier attached to live lookup answers.
pub const LIVE_RESULT_ID: &str = "web_dd";

/// Title used when a live answer carries no heading.
pub const LIVE_DEFAULT_TITLE: &str = "Web search";

/// A short answer obtained from a live lookup service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveAnswer {
    pub heading: Option<String>,
    pub text: String,
}

/// Rank `documents` by term overlap with `query`.
///
/// # Example
///
/// ```rust
/// use olive_core::models::Document;
/// use olive_core::retrieval::score;
///
/// let docs = vec![
///     Document::new("1", "", "saya suka apel"),
///     Document::new("2", "", "tidak relevan"),
/// ];
/// let results = score("apel jeruk", &docs, 3);
/// assert_eq!(results.len(), 1);
/// assert_eq!(results[0].id, "1");
/// assert_eq!(results[0].score, 1);
/// ```
pub fn score(query: &str, documents: &[Document], top_k: usize) -> Vec<ScoredResult> {
    let query_terms = tokenize(query);
    if query_terms.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<ScoredResult> = documents
        .iter()
        .filter_map(|doc| {
            let overlap = tokenize(&doc.text)
                .iter()
                .filter(|t| query_terms.contains(*t))
                .count();
            (overlap > 0).then(|| ScoredResult {
                id: doc.id.clone(),
                title: doc.title.clone(),
                text: doc.text.clone(),
                score: u32::try_from(overlap).unwrap_or(LIVE_SCORE - 1),
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.cmp(&a.score));
    scored.truncate(top_k);
    scored
}

/// Prepend a live lookup answer to local results.
///
/// Blank answers are dropped. No deduplication against `local` is done.
pub fn merge_live(local: Vec<ScoredResult>, live: Option<LiveAnswer>) -> Vec<ScoredResult> {
    let Some(answer) = live else {
        return local;
    };
    if answer.text.trim().is_empty() {
        return local;
    }

    let title = answer
        .heading
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| LIVE_DEFAULT_TITLE.to_string());

    let mut results = Vec::with_capacity(local.len() + 1);
    results.push(ScoredResult {
        id: LIVE_RESULT_ID.to_string(),
        title,
        text: answer.text,
        score: LIVE_SCORE,
    });
    results.extend(local);
    results
}

const LIVE_PATTERNS: &[&str] = &[
    r"tahun berapa",
    r"tanggal.*berapa",
    r"jam berapa",
    r"berapa (sekarang|saat ini)",
    r"\b(hari ini|sekarang)\b",
    r"siapa presiden",
    r"apa berita",
    r"cuaca",
    r"what time",
    r"what year",
    r"\b(today|now)\b",
    r"current president",
    r"\bnews\b",
    r"weather",
];

fn live_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        LIVE_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
            .collect()
    })
}

/// Whether `query` asks for information that local documents cannot hold.
pub fn needs_live_lookup(query: &str) -> bool {
    if query.trim().is_empty() {
        return false;
    }
    let lowered = query.to_lowercase();
    live_patterns().iter().any(|rx| rx.is_match(&lowered))
}
