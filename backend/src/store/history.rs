//! Durable log of previously emitted recommendations.
//!
//! Append-only: records are never mutated after creation, and appending a
//! fingerprint that is already present is a no-op.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::json_file::{load_or_default, save_atomic};
use crate::dedup::normalize::fingerprint_of;
use crate::error::StoreResult;
use crate::models::ArtistAlbum;

/// One emitted recommendation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    /// Normalized `artist|album`.
    pub fingerprint: String,
    pub artist: String,
    pub album: String,
    pub recorded_at: DateTime<Utc>,
    /// Pipeline run that emitted it.
    pub run_id: Uuid,
}

impl HistoryRecord {
    pub fn from_item<T: ArtistAlbum>(item: &T, run_id: Uuid) -> Self {
        Self {
            fingerprint: fingerprint_of(item),
            artist: item.artist().to_string(),
            album: item.album().to_string(),
            recorded_at: Utc::now(),
            run_id,
        }
    }
}

/// Store contract read by deduplication and written after successful runs.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Whether `fingerprint` was ever emitted.
    async fn contains(&self, fingerprint: &str) -> StoreResult<bool>;

    /// Snapshot of every recorded fingerprint.
    async fn fingerprints(&self) -> StoreResult<HashSet<String>>;

    /// Append records, skipping fingerprints already present.
    /// Returns how many were added.
    async fn append(&self, records: Vec<HistoryRecord>) -> StoreResult<usize>;

    /// All records in insertion order.
    async fn records(&self) -> StoreResult<Vec<HistoryRecord>>;
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Debug, Default)]
struct HistoryState {
    records: Vec<HistoryRecord>,
    index: HashSet<String>,
}

impl HistoryState {
    fn from_records(records: Vec<HistoryRecord>) -> Self {
        let index = records.iter().map(|r| r.fingerprint.clone()).collect();
        Self { records, index }
    }

    fn append(&mut self, records: Vec<HistoryRecord>) -> Vec<HistoryRecord> {
        let mut added = Vec::new();
        for record in records {
            if self.index.insert(record.fingerprint.clone()) {
                self.records.push(record.clone());
                added.push(record);
            }
        }
        added
    }
}

/// History held in process memory.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    state: RwLock<HistoryState>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with existing records (tests, migrations).
    pub fn with_records(records: Vec<HistoryRecord>) -> Self {
        Self {
            state: RwLock::new(HistoryState::from_records(records)),
        }
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn contains(&self, fingerprint: &str) -> StoreResult<bool> {
        Ok(self.state.read().await.index.contains(fingerprint))
    }

    async fn fingerprints(&self) -> StoreResult<HashSet<String>> {
        Ok(self.state.read().await.index.clone())
    }

    async fn append(&self, records: Vec<HistoryRecord>) -> StoreResult<usize> {
        Ok(self.state.write().await.append(records).len())
    }

    async fn records(&self) -> StoreResult<Vec<HistoryRecord>> {
        Ok(self.state.read().await.records.clone())
    }
}

// =============================================================================
// JSON file
// =============================================================================

const HISTORY_FILE: &str = "history.json";

/// History persisted to `<state_dir>/history.json`.
///
/// Writers are serialized by a mutex; the file is rewritten atomically on
/// every successful append.
pub struct JsonHistoryStore {
    path: PathBuf,
    state: Mutex<HistoryState>,
}

impl JsonHistoryStore {
    /// Open (or create on first write) the history in `state_dir`.
    pub async fn open(state_dir: impl AsRef<Path>) -> StoreResult<Self> {
        let path = state_dir.as_ref().join(HISTORY_FILE);
        let records: Vec<HistoryRecord> = load_or_default(&path).await?;
        Ok(Self {
            path,
            state: Mutex::new(HistoryState::from_records(records)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl HistoryStore for JsonHistoryStore {
    async fn contains(&self, fingerprint: &str) -> StoreResult<bool> {
        Ok(self.state.lock().await.index.contains(fingerprint))
    }

    async fn fingerprints(&self) -> StoreResult<HashSet<String>> {
        Ok(self.state.lock().await.index.clone())
    }

    async fn append(&self, records: Vec<HistoryRecord>) -> StoreResult<usize> {
        let mut state = self.state.lock().await;

        // Stage on a copy so a failed write leaves memory and disk in step.
        let mut staged = HistoryState::from_records(state.records.clone());
        let added = staged.append(records).len();
        if added == 0 {
            return Ok(0);
        }

        save_atomic(&self.path, &staged.records).await?;
        *state = staged;
        Ok(added)
    }

    async fn records(&self) -> StoreResult<Vec<HistoryRecord>> {
        Ok(self.state.lock().await.records.clone())
    }
}
