//! Duplication prevention.
//!
//! Three layers keep repeats out of the output:
//!
//! ```text
//! ┌───────────────────────┐   ┌────────────────────────┐   ┌──────────────────────┐
//! │ prevent_concurrent_   │   │ filter_previously_     │   │ deduplicate_         │
//! │ fetch (single-flight) │   │ recommended (History)  │   │ recommendations      │
//! │ same request, one run │   │ across runs            │   │ within one batch     │
//! └───────────────────────┘   └────────────────────────┘   └──────────────────────┘
//! ```
//!
//! All comparisons use [`normalize::fingerprint`].

pub mod normalize;
pub mod single_flight;

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::error::{PipelineResult, StoreResult};
use crate::models::{ArtistAlbum, ImportListItemInfo};
use crate::store::HistoryStore;

pub use normalize::{decode_html_entities, fingerprint, fingerprint_of, normalize};
pub use single_flight::SingleFlight;

/// Outcome shared by every caller of one coordinated run.
pub type RunOutcome = PipelineResult<Vec<ImportListItemInfo>>;

/// Session and cross-run duplicate suppression.
pub struct DuplicationPrevention {
    history: Arc<dyn HistoryStore>,
    flights: SingleFlight<RunOutcome>,
}

impl DuplicationPrevention {
    pub fn new(history: Arc<dyn HistoryStore>) -> Self {
        Self {
            history,
            flights: SingleFlight::new(),
        }
    }

    /// The history this instance filters against.
    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    /// Run `op` once per `key` across concurrent callers; every caller gets
    /// the first caller's result.
    pub async fn prevent_concurrent_fetch<F>(&self, key: &str, op: F) -> RunOutcome
    where
        F: Future<Output = RunOutcome> + Send + 'static,
    {
        self.flights.run(key, op).await
    }

    /// Collapse items with the same normalized `artist|album`, keeping the
    /// first occurrence.
    pub fn deduplicate_recommendations<T: ArtistAlbum>(&self, items: Vec<T>) -> Vec<T> {
        let before = items.len();
        let mut seen = HashSet::with_capacity(before);
        let kept: Vec<T> = items
            .into_iter()
            .filter(|item| seen.insert(fingerprint_of(item)))
            .collect();

        if kept.len() < before {
            debug!(removed = before - kept.len(), "session duplicates removed");
        }
        kept
    }

    /// Drop items already present in history, except fingerprints in
    /// `session_allow_list` (items approved for this run).
    pub async fn filter_previously_recommended<T: ArtistAlbum + Send>(
        &self,
        items: Vec<T>,
        session_allow_list: &HashSet<String>,
    ) -> StoreResult<Vec<T>> {
        if items.is_empty() {
            return Ok(items);
        }

        let known = self.history.fingerprints().await?;
        let before = items.len();
        let kept: Vec<T> = items
            .into_iter()
            .filter(|item| {
                let fp = fingerprint_of(item);
                session_allow_list.contains(&fp) || !known.contains(&fp)
            })
            .collect();

        if kept.len() < before {
            debug!(removed = before - kept.len(), "previously recommended items removed");
        }
        Ok(kept)
    }
}
