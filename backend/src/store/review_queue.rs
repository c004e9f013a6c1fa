//! Review queue for borderline recommendations.
//!
//! Entries are keyed by the normalized `artist|album` fingerprint, so approval
//! ignores case and HTML entities. An entry stays until it is released by an
//! approval key; nothing here expires it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::json_file::{load_or_default, save_atomic};
use crate::dedup::fingerprint;
use crate::error::StoreResult;
use crate::models::Recommendation;

/// A recommendation held for manual approval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEntry {
    /// Normalized `artist|album`.
    pub key: String,
    pub recommendation: Recommendation,
    /// Why it was held back.
    pub reason: String,
    pub queued_at: DateTime<Utc>,
}

impl ReviewEntry {
    pub fn new(recommendation: Recommendation, reason: impl Into<String>) -> Self {
        Self {
            key: queue_key(&recommendation.artist, &recommendation.album),
            recommendation,
            reason: reason.into(),
            queued_at: Utc::now(),
        }
    }

    /// The key a user types to approve this entry.
    pub fn approval_key(&self) -> String {
        self.recommendation.review_key()
    }
}

/// Queue key for an artist/album pair; same form as the dedup fingerprint.
pub fn queue_key(artist: &str, album: &str) -> String {
    fingerprint(artist, album)
}

/// Parse a user-supplied approval key.
///
/// Accepts exactly one `|` with a non-blank artist; the album may be empty
/// (artist-only entries). Anything else is malformed and yields `None`.
pub fn parse_approval_key(raw: &str) -> Option<String> {
    let (artist, album) = raw.split_once('|')?;
    if album.contains('|') || artist.trim().is_empty() {
        return None;
    }
    Some(queue_key(artist, album))
}

/// Queue contract used by the safety gate.
#[async_trait]
pub trait ReviewQueue: Send + Sync {
    /// Add entries; keys already pending are left untouched.
    /// Returns how many were newly queued.
    async fn enqueue(&self, entries: Vec<ReviewEntry>) -> StoreResult<usize>;

    /// Pending entries in key order.
    async fn pending(&self) -> StoreResult<Vec<ReviewEntry>>;

    /// Remove and return the entries for `keys` (already case-folded).
    async fn release(&self, keys: &[String]) -> StoreResult<Vec<ReviewEntry>>;
}

// =============================================================================
// In-memory
// =============================================================================

fn insert_new(map: &mut BTreeMap<String, ReviewEntry>, entries: Vec<ReviewEntry>) -> usize {
    let mut added = 0;
    for entry in entries {
        if !map.contains_key(&entry.key) {
            map.insert(entry.key.clone(), entry);
            added += 1;
        }
    }
    added
}

fn take_keys(map: &mut BTreeMap<String, ReviewEntry>, keys: &[String]) -> Vec<ReviewEntry> {
    keys.iter().filter_map(|k| map.remove(k)).collect()
}

/// Queue held in process memory.
#[derive(Debug, Default)]
pub struct MemoryReviewQueue {
    entries: Mutex<BTreeMap<String, ReviewEntry>>,
}

impl MemoryReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReviewQueue for MemoryReviewQueue {
    async fn enqueue(&self, entries: Vec<ReviewEntry>) -> StoreResult<usize> {
        Ok(insert_new(&mut *self.entries.lock().await, entries))
    }

    async fn pending(&self) -> StoreResult<Vec<ReviewEntry>> {
        Ok(self.entries.lock().await.values().cloned().collect())
    }

    async fn release(&self, keys: &[String]) -> StoreResult<Vec<ReviewEntry>> {
        Ok(take_keys(&mut *self.entries.lock().await, keys))
    }
}

// =============================================================================
// JSON file
// =============================================================================

const QUEUE_FILE: &str = "review_queue.json";

/// Queue persisted to `<state_dir>/review_queue.json`.
pub struct JsonReviewQueue {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, ReviewEntry>>,
}

impl JsonReviewQueue {
    pub async fn open(state_dir: impl AsRef<Path>) -> StoreResult<Self> {
        let path = state_dir.as_ref().join(QUEUE_FILE);
        let stored: Vec<ReviewEntry> = load_or_default(&path).await?;
        let entries = stored.into_iter().map(|e| (e.key.clone(), e)).collect();
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    async fn persist(&self, entries: &BTreeMap<String, ReviewEntry>) -> StoreResult<()> {
        let list: Vec<&ReviewEntry> = entries.values().collect();
        save_atomic(&self.path, &list).await
    }
}

#[async_trait]
impl ReviewQueue for JsonReviewQueue {
    async fn enqueue(&self, entries: Vec<ReviewEntry>) -> StoreResult<usize> {
        let mut current = self.entries.lock().await;
        let mut staged = current.clone();
        let added = insert_new(&mut staged, entries);
        if added > 0 {
            self.persist(&staged).await?;
            *current = staged;
        }
        Ok(added)
    }

    async fn pending(&self) -> StoreResult<Vec<ReviewEntry>> {
        Ok(self.entries.lock().await.values().cloned().collect())
    }

    async fn release(&self, keys: &[String]) -> StoreResult<Vec<ReviewEntry>> {
        let mut current = self.entries.lock().await;
        let mut staged = current.clone();
        let released = take_keys(&mut staged, keys);
        if !released.is_empty() {
            self.persist(&staged).await?;
            *current = staged;
        }
        Ok(released)
    }
}
