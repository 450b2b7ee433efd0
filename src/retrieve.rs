//! Context retrieval: stored documents scored by term overlap, optionally
//! led by a live lookup answer.
//!
//! This is what `POST /api/retrieve`, `olive retrieve`, and prompt
//! composition all call. A failing or empty live lookup only removes the
//! augmentation; local results are still returned.

use anyhow::Result;
use std::sync::Arc;

use olive_core::models::ScoredResult;
use olive_core::retrieval::{merge_live, needs_live_lookup, score, LiveAnswer};

use crate::live::LiveLookup;
use crate::store::Store;

#[derive(Clone)]
pub struct Retriever {
    store: Store,
    live: Option<Arc<dyn LiveLookup>>,
    default_top_k: usize,
}

impl Retriever {
    pub fn new(store: Store, live: Option<Arc<dyn LiveLookup>>, default_top_k: usize) -> Self {
        Self {
            store,
            live,
            default_top_k,
        }
    }

    /// Score stored documents against `query` and, when the query asks for
    /// current information, prepend a live answer.
    pub async fn retrieve(&self, query: &str, top_k: Option<usize>) -> Result<Vec<ScoredResult>> {
        let documents = self.store.list_documents().await?;
        let local = score(query, &documents, top_k.unwrap_or(self.default_top_k));

        let live = if needs_live_lookup(query) {
            self.live_answer(query).await
        } else {
            None
        };

        tracing::debug!(
            query,
            local = local.len(),
            live = live.is_some(),
            "retrieved context"
        );
        Ok(merge_live(local, live))
    }

    async fn live_answer(&self, query: &str) -> Option<LiveAnswer> {
        let live = self.live.as_ref()?;
        match live.lookup(query).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(error = %e, "live lookup failed; continuing with local results");
                None
            }
        }
    }
}
