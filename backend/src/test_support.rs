//! Stub collaborators shared by unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::models::{ImportListItemInfo, LibraryProfile, Recommendation};
use crate::pipeline::{PipelineRequest, TopUpPlanner, TopUpRequest};
use crate::provider::{ArtistResolver, FetchFn, FetchFuture, MbidResolver, TemplatePromptBuilder};
use crate::settings::RecommendationSettings;
use crate::store::MemoryReviewQueue;

/// Output item for `artist`/`album` with no year.
pub fn item(artist: &str, album: &str) -> ImportListItemInfo {
    ImportListItemInfo::from(&Recommendation::new(artist, album, 0.9))
}

/// Fetch that returns a copy of `recs` on every call.
pub fn fixed_fetch(recs: Vec<Recommendation>) -> FetchFn {
    Arc::new(move |_: LibraryProfile, _: CancellationToken| -> FetchFuture {
        let recs = recs.clone();
        Box::pin(async move { Ok(recs) })
    })
}

/// Fetch that counts its calls.
pub fn counting_fetch(recs: Vec<Recommendation>, calls: Arc<AtomicUsize>) -> FetchFn {
    Arc::new(move |_: LibraryProfile, _: CancellationToken| -> FetchFuture {
        calls.fetch_add(1, Ordering::SeqCst);
        let recs = recs.clone();
        Box::pin(async move { Ok(recs) })
    })
}

/// Fetch that always fails with `err`.
pub fn failing_fetch(err: ProviderError) -> FetchFn {
    Arc::new(move |_: LibraryProfile, _: CancellationToken| -> FetchFuture {
        let err = err.clone();
        Box::pin(async move { Err(err) })
    })
}

/// Request with an empty in-memory queue, no provider and the template
/// prompt builder.
pub fn request(settings: RecommendationSettings, fetch: FetchFn) -> PipelineRequest {
    PipelineRequest {
        settings,
        profile: Default::default(),
        fetch,
        review_queue: Arc::new(MemoryReviewQueue::new()),
        provider: None,
        prompt_builder: Arc::new(TemplatePromptBuilder),
        cancel: CancellationToken::new(),
    }
}

/// Passthrough resolver that counts calls per path.
#[derive(Debug, Default)]
pub struct CountingResolver {
    pub artist_calls: AtomicUsize,
    pub mbid_calls: AtomicUsize,
}

#[async_trait]
impl ArtistResolver for CountingResolver {
    async fn enrich_artists(
        &self,
        recommendations: Vec<Recommendation>,
        _cancel: &CancellationToken,
    ) -> Vec<Recommendation> {
        self.artist_calls.fetch_add(1, Ordering::SeqCst);
        recommendations
    }
}

#[async_trait]
impl MbidResolver for CountingResolver {
    async fn enrich_with_mbids(
        &self,
        recommendations: Vec<Recommendation>,
        _cancel: &CancellationToken,
    ) -> Vec<Recommendation> {
        self.mbid_calls.fetch_add(1, Ordering::SeqCst);
        recommendations
    }
}

/// Planner returning scripted batches, one per call, recording `needed`.
#[derive(Debug, Default)]
pub struct StubPlanner {
    script: Mutex<VecDeque<Vec<ImportListItemInfo>>>,
    requested: Mutex<Vec<usize>>,
}

impl StubPlanner {
    pub fn new(script: Vec<Vec<ImportListItemInfo>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn requested(&self) -> Vec<usize> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl TopUpPlanner for StubPlanner {
    async fn top_up(&self, request: TopUpRequest<'_>) -> Vec<ImportListItemInfo> {
        self.requested.lock().unwrap().push(request.needed);
        let mut batch = self.script.lock().unwrap().pop_front().unwrap_or_default();
        batch.truncate(request.needed);
        batch
    }
}
