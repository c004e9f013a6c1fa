//! Top-level entry point.
//!
//! ```text
//! settings + profile ─► CacheKeyBuilder ─► cache hit? ──yes──► cached items
//!                                              │
//!                                              no
//!                                              ▼
//!                         single-flight(operation id) ─► pipeline ─► cache.set ─► items
//! ```
//!
//! Concurrent callers asking for the same logical work share one pipeline
//! run and therefore one set of provider calls. The shared run observes the
//! first caller's cancellation token.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::breaker::BreakerRegistry;
use crate::cache::{CacheKeyBuilder, MemoryCache, RecommendationCache};
use crate::dedup::DuplicationPrevention;
use crate::error::{ConfigError, PipelineError, PipelineResult};
use crate::logs::RunLog;
use crate::models::{ImportListItemInfo, LibraryProfile};
use crate::pipeline::{PipelineRequest, PipelineRunner};
use crate::provider::{
    FetchFn, FetchFuture, HealthReport, PromptBuilder, ProviderInvoker, RecommendationProvider,
    TemplatePromptBuilder,
};
use crate::settings::RecommendationSettings;
use crate::store::{MemoryReviewQueue, ReviewQueue};

const STAGE: &str = "coordinator";

pub struct RecommendationCoordinator {
    cache: Arc<dyn RecommendationCache>,
    pipeline: Arc<dyn PipelineRunner>,
    dedup: Arc<DuplicationPrevention>,
    review_queue: Arc<dyn ReviewQueue>,
    provider: Option<Arc<dyn RecommendationProvider>>,
    prompt_builder: Arc<dyn PromptBuilder>,
    invoker: ProviderInvoker,
    log: RunLog,
}

impl RecommendationCoordinator {
    pub fn builder(
        pipeline: Arc<dyn PipelineRunner>,
        dedup: Arc<DuplicationPrevention>,
    ) -> CoordinatorBuilder {
        CoordinatorBuilder::new(pipeline, dedup)
    }

    /// Recommendations for `settings` against `profile`, fetching from the
    /// configured provider on a cache miss.
    pub async fn get_recommendations(
        &self,
        settings: &RecommendationSettings,
        profile: &LibraryProfile,
        cancel: &CancellationToken,
    ) -> PipelineResult<Vec<ImportListItemInfo>> {
        self.coordinate(settings, profile, None, cancel).await
    }

    /// Like [`get_recommendations`](Self::get_recommendations) with a
    /// caller-supplied primary fetch.
    pub async fn get_recommendations_with(
        &self,
        settings: &RecommendationSettings,
        profile: &LibraryProfile,
        fetch: FetchFn,
        cancel: &CancellationToken,
    ) -> PipelineResult<Vec<ImportListItemInfo>> {
        self.coordinate(settings, profile, Some(fetch), cancel).await
    }

    /// Provider connectivity plus breaker state, if a provider is configured.
    pub async fn health(&self, settings: &RecommendationSettings) -> Option<HealthReport> {
        let provider = self.provider.as_ref()?;
        Some(self.invoker.health(provider.as_ref(), settings).await)
    }

    async fn coordinate(
        &self,
        settings: &RecommendationSettings,
        profile: &LibraryProfile,
        fetch: Option<FetchFn>,
        cancel: &CancellationToken,
    ) -> PipelineResult<Vec<ImportListItemInfo>> {
        settings.validate()?;
        let verbose = settings.enable_debug_logging;

        let key = CacheKeyBuilder::build_key(settings, profile);
        if let Some(items) = self.cache.try_get(&key).await {
            self.log
                .summary(verbose, STAGE, format!("cache hit, {} items", items.len()));
            return Ok(items);
        }

        let fetch = match fetch {
            Some(fetch) => fetch,
            None => self.provider_fetch(settings)?,
        };

        let request = PipelineRequest {
            settings: settings.clone(),
            profile: profile.clone(),
            fetch,
            review_queue: self.review_queue.clone(),
            provider: self.provider.clone(),
            prompt_builder: self.prompt_builder.clone(),
            cancel: cancel.clone(),
        };
        let pipeline = self.pipeline.clone();
        let cache = self.cache.clone();
        let log = self.log.clone();
        let ttl = settings.cache_ttl();

        let op = async move {
            let output = match pipeline.run(request).await {
                Ok(output) => output,
                Err(err) => {
                    if !err.is_cancelled() {
                        log.error(STAGE, format!("pipeline failed: {}", err));
                    }
                    return Err(err);
                }
            };
            if let Err(err) = cache.set(&key, output.items.clone(), ttl).await {
                log.warning(STAGE, format!("failed to cache results: {}", err));
            }
            Ok::<_, PipelineError>(output.items)
        };

        self.log.summary(verbose, STAGE, "cache miss, running pipeline");
        self.dedup
            .prevent_concurrent_fetch(&CacheKeyBuilder::operation_id(settings, profile), op)
            .await
    }

    /// Primary fetch through the invoker and prompt builder.
    fn provider_fetch(&self, settings: &RecommendationSettings) -> PipelineResult<FetchFn> {
        let provider = self.provider.clone().ok_or(ConfigError::MissingProvider)?;
        let invoker = self.invoker.clone();
        let prompt_builder = self.prompt_builder.clone();
        let settings = settings.clone();

        Ok(Arc::new(
            move |profile: LibraryProfile, cancel: CancellationToken| -> FetchFuture {
                let provider = provider.clone();
                let invoker = invoker.clone();
                let prompt_builder = prompt_builder.clone();
                let settings = settings.clone();
                Box::pin(async move {
                    let prompt = prompt_builder.build_prompt(&profile, &settings);
                    invoker
                        .invoke(provider.as_ref(), &prompt, &settings, &cancel)
                        .await
                })
            },
        ))
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`RecommendationCoordinator`].
///
/// Defaults: in-memory cache and review queue, no provider, the template
/// prompt builder, an invoker over a fresh breaker registry and a new run
/// log.
pub struct CoordinatorBuilder {
    pipeline: Arc<dyn PipelineRunner>,
    dedup: Arc<DuplicationPrevention>,
    cache: Option<Arc<dyn RecommendationCache>>,
    review_queue: Option<Arc<dyn ReviewQueue>>,
    provider: Option<Arc<dyn RecommendationProvider>>,
    prompt_builder: Option<Arc<dyn PromptBuilder>>,
    invoker: Option<ProviderInvoker>,
    log: Option<RunLog>,
}

impl CoordinatorBuilder {
    pub fn new(pipeline: Arc<dyn PipelineRunner>, dedup: Arc<DuplicationPrevention>) -> Self {
        Self {
            pipeline,
            dedup,
            cache: None,
            review_queue: None,
            provider: None,
            prompt_builder: None,
            invoker: None,
            log: None,
        }
    }

    pub fn cache(mut self, cache: Arc<dyn RecommendationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn review_queue(mut self, queue: Arc<dyn ReviewQueue>) -> Self {
        self.review_queue = Some(queue);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn RecommendationProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn prompt_builder(mut self, builder: Arc<dyn PromptBuilder>) -> Self {
        self.prompt_builder = Some(builder);
        self
    }

    pub fn invoker(mut self, invoker: ProviderInvoker) -> Self {
        self.invoker = Some(invoker);
        self
    }

    pub fn log(mut self, log: RunLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn build(self) -> RecommendationCoordinator {
        RecommendationCoordinator {
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(MemoryCache::new()) as Arc<dyn RecommendationCache>),
            pipeline: self.pipeline,
            dedup: self.dedup,
            review_queue: self
                .review_queue
                .unwrap_or_else(|| Arc::new(MemoryReviewQueue::new()) as Arc<dyn ReviewQueue>),
            provider: self.provider,
            prompt_builder: self
                .prompt_builder
                .unwrap_or_else(|| Arc::new(TemplatePromptBuilder) as Arc<dyn PromptBuilder>),
            invoker: self
                .invoker
                .unwrap_or_else(|| ProviderInvoker::new(Arc::new(BreakerRegistry::default()))),
            log: self.log.unwrap_or_default(),
        }
    }
}
