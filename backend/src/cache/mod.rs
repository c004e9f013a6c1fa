//! Recommendation cache - key derivation and a shared TTL store.
//!
//! - [`key::CacheKeyBuilder`] turns settings plus a library profile into a
//!   stable key.
//! - [`RecommendationCache`] is the store contract the coordinator uses.
//! - [`MemoryCache`] is the default implementation: last-write-wins, optional
//!   per-entry TTL, expired entries evicted on read.

pub mod key;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::StoreResult;
use crate::models::ImportListItemInfo;

pub use key::CacheKeyBuilder;

/// Store contract for finished recommendation lists.
#[async_trait]
pub trait RecommendationCache: Send + Sync {
    /// Cached items for `key`, `None` on miss or expiry.
    async fn try_get(&self, key: &str) -> Option<Vec<ImportListItemInfo>>;

    /// Store `items` under `key`, replacing any previous entry.
    async fn set(
        &self,
        key: &str,
        items: Vec<ImportListItemInfo>,
        ttl: Option<Duration>,
    ) -> StoreResult<()>;
}

/// A cached list with its expiry.
#[derive(Debug, Clone)]
struct CachedEntry {
    items: Vec<ImportListItemInfo>,
    expires_at: Option<Instant>,
}

impl CachedEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-process cache shared by all coordinator calls.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CachedEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RecommendationCache for MemoryCache {
    async fn try_get(&self, key: &str) -> Option<Vec<ImportListItemInfo>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => return Some(entry.items.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: evict under the write lock, re-checking in case a fresh
        // value landed in between.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        None
    }

    async fn set(
        &self,
        key: &str,
        items: Vec<ImportListItemInfo>,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let entry = CachedEntry {
            items,
            // A TTL past the clock's range means no expiry.
            expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }
}
