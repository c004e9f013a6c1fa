//! Recommendation pipeline.
//!
//! Turns one raw provider batch into the final item list:
//!
//! ```text
//! fetch ─► validate ─► enrich ─► gate ─► history ─► session ─► library ─┐
//!                                                                       │
//!        ┌──────────────────── while short, up to N rounds ─────────────┘
//!        ▼
//!     top up ─► session ─► library ─► truncate ─► commit (history, queue)
//! ```
//!
//! Cancellation is checked at every stage boundary; a cancelled run returns
//! [`PipelineError::Cancelled`] and writes nothing. Both dedup passes use
//! the same fingerprint normalization and the same [`LibraryIndex`].

pub mod library_filter;
pub mod topup;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::breaker::BreakerRegistry;
use crate::dedup::{fingerprint_of, DuplicationPrevention};
use crate::error::{PipelineError, PipelineResult, ProviderError};
use crate::logs::RunLog;
use crate::models::{ImportListItemInfo, LibraryProfile, Recommendation, ValidationResult};
use crate::provider::{
    ArtistResolver, FetchFn, LibraryCollaborator, MbidResolver, PassthroughResolver,
    PromptBuilder, ProviderInvoker, RecommendationProvider, StaticLibrary,
};
use crate::safety::SafetyGateService;
use crate::settings::RecommendationSettings;
use crate::store::{HistoryRecord, ReviewQueue};
use crate::validation::{SchemaValidator, Validator};

pub use library_filter::LibraryIndex;
pub use topup::{ProviderTopUpPlanner, TopUpPlanner, TopUpRequest};

// =============================================================================
// Request / Output
// =============================================================================

/// Inputs for one run.
#[derive(Clone)]
pub struct PipelineRequest {
    pub settings: RecommendationSettings,
    pub profile: LibraryProfile,
    /// Primary fetch.
    pub fetch: FetchFn,
    pub review_queue: Arc<dyn ReviewQueue>,
    /// Used by top-up; `None` disables it.
    pub provider: Option<Arc<dyn RecommendationProvider>>,
    pub prompt_builder: Arc<dyn PromptBuilder>,
    pub cancel: CancellationToken,
}

/// Per-stage counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub target: usize,
    pub fetched: usize,
    pub valid: usize,
    pub filtered: usize,
    pub sanitized_fields: usize,
    pub gated: usize,
    pub approved: usize,
    pub promoted: usize,
    pub queued: usize,
    pub history_removed: usize,
    pub session_removed: usize,
    pub library_removed: usize,
    pub topup_rounds: u32,
    pub topup_added: usize,
    pub returned: usize,
    pub recorded: usize,
}

impl PipelineStats {
    pub fn shortfall(&self) -> usize {
        self.target.saturating_sub(self.returned)
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub run_id: Uuid,
    pub items: Vec<ImportListItemInfo>,
    pub stats: PipelineStats,
}

/// Anything that can execute a run. The coordinator depends on this.
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    async fn run(&self, request: PipelineRequest) -> PipelineResult<PipelineOutput>;
}

fn ensure_active(cancel: &CancellationToken) -> PipelineResult<()> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

// =============================================================================
// Pipeline
// =============================================================================

pub struct RecommendationPipeline {
    validator: Arc<dyn Validator>,
    artist_resolver: Arc<dyn ArtistResolver>,
    mbid_resolver: Arc<dyn MbidResolver>,
    gate: SafetyGateService,
    dedup: Arc<DuplicationPrevention>,
    library: Arc<dyn LibraryCollaborator>,
    planner: Arc<dyn TopUpPlanner>,
    log: RunLog,
}

impl RecommendationPipeline {
    pub fn builder(dedup: Arc<DuplicationPrevention>) -> PipelineBuilder {
        PipelineBuilder::new(dedup)
    }

    pub fn dedup(&self) -> &Arc<DuplicationPrevention> {
        &self.dedup
    }

    fn log_filtered(&self, settings: &RecommendationSettings, validation: &ValidationResult) {
        if settings.log_per_item_decisions {
            for detail in &validation.filter_details {
                self.log
                    .item("validate", format!("filtered {}: {}", detail.recommendation, detail.reason));
            }
        }
    }

    async fn enrich(
        &self,
        settings: &RecommendationSettings,
        valid: Vec<Recommendation>,
        cancel: &CancellationToken,
    ) -> Vec<Recommendation> {
        if settings.recommendation_mode.is_artist_mode() {
            self.artist_resolver.enrich_artists(valid, cancel).await
        } else {
            self.mbid_resolver.enrich_with_mbids(valid, cancel).await
        }
    }

    /// Session dedup then library filter over items; returns removal counts.
    fn second_pass(
        &self,
        items: Vec<ImportListItemInfo>,
        index: &LibraryIndex,
        settings: &RecommendationSettings,
    ) -> (Vec<ImportListItemInfo>, usize, usize) {
        let before = items.len();
        let unique = self.dedup.deduplicate_recommendations(items);
        let session_removed = before - unique.len();
        let before = unique.len();
        let kept = index.filter(unique, settings.recommendation_mode);
        let library_removed = before - kept.len();
        (kept, session_removed, library_removed)
    }
}

#[async_trait]
impl PipelineRunner for RecommendationPipeline {
    async fn run(&self, request: PipelineRequest) -> PipelineResult<PipelineOutput> {
        let PipelineRequest {
            settings,
            profile,
            fetch,
            review_queue,
            provider,
            prompt_builder,
            cancel,
        } = request;

        settings.validate()?;
        let run_id = Uuid::new_v4();
        let verbose = settings.enable_debug_logging;
        let mode = settings.recommendation_mode;
        let target = settings.target_count();
        let mut stats = PipelineStats {
            target,
            ..PipelineStats::default()
        };

        // Fetch
        ensure_active(&cancel)?;
        let raw = match fetch(profile.clone(), cancel.clone()).await {
            Ok(raw) => raw,
            Err(ProviderError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(err) => return Err(err.into()),
        };
        stats.fetched = raw.len();

        // Validate
        ensure_active(&cancel)?;
        let validation = self.validator.validate_batch(raw, mode.is_artist_mode());
        stats.valid = validation.valid_count;
        stats.filtered = validation.filtered_count;
        stats.sanitized_fields = validation.sanitization.total();
        self.log_filtered(&settings, &validation);
        self.log.summary(
            verbose,
            "validate",
            format!("{} of {} candidates valid", validation.valid_count, validation.total_count),
        );

        // Enrich
        ensure_active(&cancel)?;
        let enriched = self
            .enrich(&settings, validation.valid_recommendations.clone(), &cancel)
            .await;

        // Gate
        ensure_active(&cancel)?;
        let history = self.dedup.history().clone();
        let gate = self
            .gate
            .apply(enriched, &settings, review_queue.as_ref(), history.as_ref(), &cancel)
            .await?;
        stats.gated = gate.kept.len();
        stats.approved = gate.approved.len();
        stats.promoted = gate.promoted;

        // Dedup pass 1: history -> session -> library
        ensure_active(&cancel)?;
        let allow_list = gate.approved_fingerprints();
        let candidates = gate.kept.clone();
        let before = candidates.len();
        let fresh = self
            .dedup
            .filter_previously_recommended(candidates, &allow_list)
            .await?;
        stats.history_removed = before - fresh.len();

        let before = fresh.len();
        let unique = self.dedup.deduplicate_recommendations(fresh);
        stats.session_removed = before - unique.len();

        let index = LibraryIndex::load(self.library.as_ref()).await;
        let before = unique.len();
        let owned_filtered = index.filter(unique, mode);
        stats.library_removed = before - owned_filtered.len();

        let mut items: Vec<ImportListItemInfo> =
            owned_filtered.iter().map(ImportListItemInfo::from).collect();
        self.log.summary(
            verbose,
            "dedup",
            format!(
                "{} left after dedup ({} history, {} session, {} library)",
                items.len(),
                stats.history_removed,
                stats.session_removed,
                stats.library_removed
            ),
        );

        // Top up
        let max_rounds = settings.backfill_strategy.max_rounds();
        while items.len() < target && stats.topup_rounds < max_rounds {
            ensure_active(&cancel)?;
            let needed = target - items.len();
            let exclude: HashSet<String> = items.iter().map(fingerprint_of).collect();

            let added = self
                .planner
                .top_up(TopUpRequest {
                    settings: &settings,
                    provider: provider.as_deref(),
                    library: self.library.as_ref(),
                    prompt_builder: prompt_builder.as_ref(),
                    dedup: self.dedup.as_ref(),
                    profile: &profile,
                    needed,
                    prior: &validation,
                    exclude: &exclude,
                    cancel: &cancel,
                })
                .await;
            stats.topup_rounds += 1;

            if added.is_empty() {
                self.log.debug("topup", format!("round {} added nothing, stopping", stats.topup_rounds));
                break;
            }

            // Dedup pass 2: session -> library
            let previous = items.len();
            items.extend(added);
            let (kept, session, library) = self.second_pass(items, &index, &settings);
            stats.session_removed += session;
            stats.library_removed += library;
            stats.topup_added += kept.len().saturating_sub(previous);
            items = kept;
        }
        ensure_active(&cancel)?;

        items.truncate(target);
        stats.returned = items.len();

        // Commit: history first, then the queue. A queue failure after
        // history succeeded is logged, not raised.
        let records: Vec<HistoryRecord> = items
            .iter()
            .map(|item| HistoryRecord::from_item(item, run_id))
            .collect();
        stats.recorded = history.append(records).await?;
        match self.gate.commit(&gate, review_queue.as_ref()).await {
            Ok(changes) => stats.queued = changes.queued,
            Err(err) => self
                .log
                .warning("gate", format!("review queue not updated: {}", err)),
        }

        if stats.shortfall() > 0 {
            self.log.warning(
                "pipeline",
                format!("returning {} of {} requested items", stats.returned, target),
            );
        } else {
            self.log.success("pipeline", format!("returning {} items", stats.returned));
        }

        Ok(PipelineOutput {
            run_id,
            items,
            stats,
        })
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`RecommendationPipeline`].
///
/// Only the duplication-prevention layer is required. Defaults:
///
/// | Collaborator      | Default                                         |
/// |-------------------|-------------------------------------------------|
/// | validator         | [`SchemaValidator`]                             |
/// | resolvers         | [`PassthroughResolver`]                         |
/// | library           | empty [`StaticLibrary`]                         |
/// | invoker           | fresh [`BreakerRegistry`] with default config   |
/// | planner           | [`ProviderTopUpPlanner`] over the invoker       |
/// | log               | new [`RunLog`]                                  |
pub struct PipelineBuilder {
    dedup: Arc<DuplicationPrevention>,
    validator: Option<Arc<dyn Validator>>,
    artist_resolver: Option<Arc<dyn ArtistResolver>>,
    mbid_resolver: Option<Arc<dyn MbidResolver>>,
    library: Option<Arc<dyn LibraryCollaborator>>,
    planner: Option<Arc<dyn TopUpPlanner>>,
    invoker: Option<ProviderInvoker>,
    log: Option<RunLog>,
}

impl PipelineBuilder {
    pub fn new(dedup: Arc<DuplicationPrevention>) -> Self {
        Self {
            dedup,
            validator: None,
            artist_resolver: None,
            mbid_resolver: None,
            library: None,
            planner: None,
            invoker: None,
            log: None,
        }
    }

    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn artist_resolver(mut self, resolver: Arc<dyn ArtistResolver>) -> Self {
        self.artist_resolver = Some(resolver);
        self
    }

    pub fn mbid_resolver(mut self, resolver: Arc<dyn MbidResolver>) -> Self {
        self.mbid_resolver = Some(resolver);
        self
    }

    pub fn library(mut self, library: Arc<dyn LibraryCollaborator>) -> Self {
        self.library = Some(library);
        self
    }

    pub fn planner(mut self, planner: Arc<dyn TopUpPlanner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Invoker for the default planner. Share it with the coordinator so
    /// both use the same breakers.
    pub fn invoker(mut self, invoker: ProviderInvoker) -> Self {
        self.invoker = Some(invoker);
        self
    }

    pub fn log(mut self, log: RunLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn build(self) -> RecommendationPipeline {
        let log = self.log.unwrap_or_default();
        let validator = self
            .validator
            .unwrap_or_else(|| Arc::new(SchemaValidator::new()) as Arc<dyn Validator>);
        let planner = match self.planner {
            Some(planner) => planner,
            None => {
                let invoker = self
                    .invoker
                    .unwrap_or_else(|| ProviderInvoker::new(Arc::new(BreakerRegistry::default())));
                Arc::new(ProviderTopUpPlanner::new(invoker, validator.clone(), log.clone()))
            }
        };

        RecommendationPipeline {
            validator,
            artist_resolver: self
                .artist_resolver
                .unwrap_or_else(|| Arc::new(PassthroughResolver) as Arc<dyn ArtistResolver>),
            mbid_resolver: self
                .mbid_resolver
                .unwrap_or_else(|| Arc::new(PassthroughResolver) as Arc<dyn MbidResolver>),
            gate: SafetyGateService::new(log.clone()),
            dedup: self.dedup,
            library: self
                .library
                .unwrap_or_else(|| Arc::new(StaticLibrary::new()) as Arc<dyn LibraryCollaborator>),
            planner,
            log,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecommendationMode;
    use crate::settings::BackfillStrategy;
    use crate::error::{StoreError, StoreResult};
    use crate::logs::LogLevel;
    use crate::provider::FetchFuture;
    use crate::store::{HistoryStore, MemoryHistoryStore, MemoryReviewQueue, ReviewEntry};
    use crate::test_support::{
        failing_fetch, fixed_fetch, item, request, CountingResolver, StubPlanner,
    };
    use std::sync::atomic::Ordering;

    const ARTIST_ID: &str = "a74b1b7f-71a5-4011-9441-d0b5e4122711";

    /// Queue that can be read but rejects every write.
    struct ReadOnlyQueue;

    #[async_trait]
    impl ReviewQueue for ReadOnlyQueue {
        async fn enqueue(&self, _entries: Vec<ReviewEntry>) -> StoreResult<usize> {
            Err(StoreError::Io("queue is read-only".into()))
        }

        async fn pending(&self) -> StoreResult<Vec<ReviewEntry>> {
            Ok(Vec::new())
        }

        async fn release(&self, _keys: &[String]) -> StoreResult<Vec<ReviewEntry>> {
            Err(StoreError::Io("queue is read-only".into()))
        }
    }

    /// History that reads fine but fails on append.
    #[derive(Default)]
    struct AppendFailingHistory {
        inner: MemoryHistoryStore,
    }

    #[async_trait]
    impl HistoryStore for AppendFailingHistory {
        async fn contains(&self, fingerprint: &str) -> StoreResult<bool> {
            self.inner.contains(fingerprint).await
        }

        async fn fingerprints(&self) -> StoreResult<HashSet<String>> {
            self.inner.fingerprints().await
        }

        async fn append(&self, _records: Vec<HistoryRecord>) -> StoreResult<usize> {
            Err(StoreError::Io("disk full".into()))
        }

        async fn records(&self) -> StoreResult<Vec<HistoryRecord>> {
            self.inner.records().await
        }
    }

    /// Planner that supplies items and cancels the run while doing so.
    struct CancellingPlanner;

    #[async_trait]
    impl TopUpPlanner for CancellingPlanner {
        async fn top_up(&self, request: TopUpRequest<'_>) -> Vec<ImportListItemInfo> {
            request.cancel.cancel();
            vec![item("Late", "Arrival")]
        }
    }

    fn base_settings(max: u32) -> RecommendationSettings {
        RecommendationSettings {
            max_recommendations: max,
            require_mbids: false,
            queue_borderline_items: false,
            ..RecommendationSettings::default()
        }
    }

    fn pipeline_with(
        library: StaticLibrary,
        planner: Arc<StubPlanner>,
        resolver: Arc<CountingResolver>,
    ) -> RecommendationPipeline {
        let dedup = Arc::new(DuplicationPrevention::new(Arc::new(MemoryHistoryStore::new())));
        RecommendationPipeline::builder(dedup)
            .library(Arc::new(library))
            .planner(planner)
            .artist_resolver(resolver.clone())
            .mbid_resolver(resolver)
            .build()
    }

    fn pairs(items: &[ImportListItemInfo]) -> Vec<(&str, &str)> {
        items.iter().map(|i| (i.artist.as_str(), i.album.as_str())).collect()
    }

    #[tokio::test]
    async fn test_artist_mode_uses_only_artist_resolver() {
        let resolver = Arc::new(CountingResolver::default());
        let pipeline = pipeline_with(StaticLibrary::new(), Arc::new(StubPlanner::empty()), resolver.clone());
        let settings = RecommendationSettings {
            recommendation_mode: RecommendationMode::Artists,
            ..base_settings(1)
        };

        pipeline
            .run(request(settings, fixed_fetch(vec![Recommendation::artist_only("Mitski", 0.9)])))
            .await
            .unwrap();

        assert_eq!(resolver.artist_calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.mbid_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_album_modes_use_only_mbid_resolver() {
        for mode in [RecommendationMode::Albums, RecommendationMode::SpecificAlbums] {
            let resolver = Arc::new(CountingResolver::default());
            let pipeline =
                pipeline_with(StaticLibrary::new(), Arc::new(StubPlanner::empty()), resolver.clone());
            let settings = RecommendationSettings {
                recommendation_mode: mode,
                ..base_settings(1)
            };

            pipeline
                .run(request(settings, fixed_fetch(vec![Recommendation::new("Mitski", "Be the Cowboy", 0.9)])))
                .await
                .unwrap();

            assert_eq!(resolver.artist_calls.load(Ordering::SeqCst), 0);
            assert_eq!(resolver.mbid_calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_top_up_fills_deficit() {
        let planner = Arc::new(StubPlanner::new(vec![vec![
            item("Boygenius", "The Record"),
            item("Big Thief", "Capacity"),
            item("Wednesday", "Rat Saw God"),
        ]]));
        let pipeline = pipeline_with(StaticLibrary::new(), planner.clone(), Arc::default());

        let output = pipeline
            .run(request(
                base_settings(5),
                fixed_fetch(vec![
                    Recommendation::new("Alvvays", "Blue Rev", 0.9),
                    Recommendation::new("Slowdive", "Souvlaki", 0.9),
                ]),
            ))
            .await
            .unwrap();

        assert_eq!(output.items.len(), 5);
        assert_eq!(planner.requested(), vec![3]);
        assert_eq!(output.stats.topup_added, 3);
        assert_eq!(output.stats.shortfall(), 0);
    }

    #[tokio::test]
    async fn test_end_to_end_library_and_top_up() {
        let planner = Arc::new(StubPlanner::new(vec![vec![item("Phoebe Bridgers", "Punisher")]]));
        let library = StaticLibrary::new().with_album("Arctic Monkeys", "The Car");
        let pipeline = pipeline_with(library, planner.clone(), Arc::default());

        let output = pipeline
            .run(request(
                base_settings(2),
                fixed_fetch(vec![
                    Recommendation::new("Arctic Monkeys", "The Car", 0.9),
                    Recommendation::new("Lana Del Rey", "Ocean Blvd", 0.9),
                ]),
            ))
            .await
            .unwrap();

        assert_eq!(
            pairs(&output.items),
            vec![("Lana Del Rey", "Ocean Blvd"), ("Phoebe Bridgers", "Punisher")]
        );
        assert_eq!(planner.requested(), vec![1]);
        assert_eq!(output.stats.library_removed, 1);
    }

    #[tokio::test]
    async fn test_entity_encoded_artist_filtered_against_library() {
        let library = StaticLibrary::new().with_artist("AC/DC & Friends");
        let pipeline = pipeline_with(library, Arc::new(StubPlanner::empty()), Arc::default());
        let settings = RecommendationSettings {
            recommendation_mode: RecommendationMode::Artists,
            backfill_strategy: BackfillStrategy::Off,
            ..base_settings(2)
        };

        let output = pipeline
            .run(request(
                settings,
                fixed_fetch(vec![
                    Recommendation::artist_only("AC/DC &amp; Friends", 0.9),
                    Recommendation::artist_only("Wet Leg", 0.9),
                ]),
            ))
            .await
            .unwrap();

        assert_eq!(pairs(&output.items), vec![("Wet Leg", "")]);
    }

    #[tokio::test]
    async fn test_second_pass_catches_top_up_duplicates() {
        let planner = Arc::new(StubPlanner::new(vec![
            vec![item("lana del rey", "OCEAN  BLVD"), item("Mitski", "Laurel Hell")],
            vec![item("Arctic Monkeys", "The Car")],
        ]));
        let library = StaticLibrary::new().with_album("Arctic Monkeys", "The Car");
        let pipeline = pipeline_with(library, planner.clone(), Arc::default());

        let output = pipeline
            .run(request(
                base_settings(3),
                fixed_fetch(vec![Recommendation::new("Lana Del Rey", "Ocean Blvd", 0.9)]),
            ))
            .await
            .unwrap();

        assert_eq!(
            pairs(&output.items),
            vec![("Lana Del Rey", "Ocean Blvd"), ("Mitski", "Laurel Hell")]
        );
        assert_eq!(planner.requested(), vec![2, 1]);
        assert_eq!(output.stats.topup_added, 1);
        assert_eq!(output.stats.session_removed, 1);
        assert_eq!(output.stats.library_removed, 1);
    }

    #[tokio::test]
    async fn test_backfill_rounds_are_bounded() {
        let planner = Arc::new(StubPlanner::new(vec![
            vec![item("One", "A")],
            vec![item("Two", "B")],
            vec![item("Three", "C")],
        ]));
        let pipeline = pipeline_with(StaticLibrary::new(), planner.clone(), Arc::default());

        let output = pipeline
            .run(request(base_settings(10), fixed_fetch(Vec::new())))
            .await
            .unwrap();

        assert_eq!(planner.requested(), vec![10, 9]);
        assert_eq!(output.items.len(), 2);
        assert_eq!(output.stats.topup_rounds, 2);
        assert_eq!(output.stats.shortfall(), 8);
    }

    #[tokio::test]
    async fn test_empty_top_up_stops_early() {
        let planner = Arc::new(StubPlanner::empty());
        let pipeline = pipeline_with(StaticLibrary::new(), planner.clone(), Arc::default());
        let settings = RecommendationSettings {
            backfill_strategy: BackfillStrategy::Aggressive,
            ..base_settings(4)
        };

        let output = pipeline
            .run(request(settings, fixed_fetch(vec![Recommendation::new("A", "B", 0.9)])))
            .await
            .unwrap();

        assert_eq!(planner.requested(), vec![3]);
        assert_eq!(output.items.len(), 1);
    }

    #[tokio::test]
    async fn test_output_truncated_to_target() {
        let pipeline = pipeline_with(StaticLibrary::new(), Arc::new(StubPlanner::empty()), Arc::default());
        let recs = (0..5)
            .map(|i| Recommendation::new(format!("Artist {}", i), format!("Record {}", i), 0.9))
            .collect();

        let output = pipeline.run(request(base_settings(3), fixed_fetch(recs))).await.unwrap();
        assert_eq!(output.items.len(), 3);
        assert_eq!(output.items[0].artist, "Artist 0");
    }

    #[tokio::test]
    async fn test_history_suppresses_repeats_across_runs() {
        let pipeline = pipeline_with(StaticLibrary::new(), Arc::new(StubPlanner::empty()), Arc::default());
        let recs = vec![Recommendation::new("Alvvays", "Blue Rev", 0.9)];

        let first = pipeline
            .run(request(base_settings(1), fixed_fetch(recs.clone())))
            .await
            .unwrap();
        assert_eq!(first.items.len(), 1);
        assert_eq!(first.stats.recorded, 1);

        let second = pipeline
            .run(request(base_settings(1), fixed_fetch(recs)))
            .await
            .unwrap();
        assert!(second.items.is_empty());
        assert_eq!(second.stats.history_removed, 1);
    }

    #[tokio::test]
    async fn test_approved_item_bypasses_history() {
        let pipeline = pipeline_with(StaticLibrary::new(), Arc::new(StubPlanner::empty()), Arc::default());
        let approved = Recommendation::new("Weyes Blood", "Titanic Rising", 0.5);
        pipeline
            .dedup()
            .history()
            .append(vec![HistoryRecord::from_item(&approved, Uuid::new_v4())])
            .await
            .unwrap();

        let queue = Arc::new(MemoryReviewQueue::new());
        queue
            .enqueue(vec![ReviewEntry::new(approved, "borderline")])
            .await
            .unwrap();

        let mut req = request(
            RecommendationSettings {
                review_approve_keys: vec!["Weyes Blood|Titanic Rising".into()],
                backfill_strategy: BackfillStrategy::Off,
                ..base_settings(1)
            },
            fixed_fetch(Vec::new()),
        );
        req.review_queue = queue.clone();

        let output = pipeline.run(req).await.unwrap();
        assert_eq!(pairs(&output.items), vec![("Weyes Blood", "Titanic Rising")]);
        assert!(queue.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_writes_nothing() {
        let pipeline = pipeline_with(StaticLibrary::new(), Arc::new(StubPlanner::empty()), Arc::default());
        let queue = Arc::new(MemoryReviewQueue::new());
        let mut req = request(
            RecommendationSettings {
                queue_borderline_items: true,
                ..base_settings(1)
            },
            fixed_fetch(vec![
                Recommendation::new("Kept", "Debut", 0.9),
                Recommendation::new("Borderline", "Debut", 0.3),
            ]),
        );
        req.review_queue = queue.clone();
        req.cancel.cancel();

        let err = pipeline.run(req).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(pipeline.dedup().history().records().await.unwrap().is_empty());
        assert!(queue.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_borderline_items_queued_on_success() {
        let pipeline = pipeline_with(StaticLibrary::new(), Arc::new(StubPlanner::empty()), Arc::default());
        let queue = Arc::new(MemoryReviewQueue::new());
        let mut req = request(
            RecommendationSettings {
                queue_borderline_items: true,
                ..base_settings(1)
            },
            fixed_fetch(vec![
                Recommendation::new("Kept", "Debut", 0.9),
                Recommendation::new("Borderline", "Debut", 0.3),
            ]),
        );
        req.review_queue = queue.clone();

        let output = pipeline.run(req).await.unwrap();
        assert_eq!(output.stats.queued, 1);
        assert_eq!(queue.pending().await.unwrap()[0].approval_key(), "Borderline|Debut");
    }

    #[tokio::test]
    async fn test_primary_fetch_error_propagates() {
        let pipeline = pipeline_with(StaticLibrary::new(), Arc::new(StubPlanner::empty()), Arc::default());
        let fetch = failing_fetch(ProviderError::RequestFailed("connection refused".into()));

        let err = pipeline.run(request(base_settings(1), fetch)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Provider(ProviderError::RequestFailed(_))));
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected_before_fetch() {
        let pipeline = pipeline_with(StaticLibrary::new(), Arc::new(StubPlanner::empty()), Arc::default());
        let err = pipeline
            .run(request(base_settings(0), fixed_fetch(Vec::new())))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[tokio::test]
    async fn test_cancelled_during_fetch_writes_nothing() {
        let pipeline = pipeline_with(StaticLibrary::new(), Arc::new(StubPlanner::empty()), Arc::default());
        let queue = Arc::new(MemoryReviewQueue::new());
        let fetch: FetchFn = Arc::new(|_: LibraryProfile, cancel: CancellationToken| -> FetchFuture {
            Box::pin(async move {
                cancel.cancel();
                Ok(vec![
                    Recommendation::new("Kept", "Debut", 0.9),
                    Recommendation::new("Borderline", "Debut", 0.3),
                ])
            })
        });
        let mut req = request(
            RecommendationSettings {
                queue_borderline_items: true,
                ..base_settings(1)
            },
            fetch,
        );
        req.review_queue = queue.clone();

        let err = pipeline.run(req).await.unwrap_err();
        assert_eq!(err, PipelineError::Cancelled);
        assert!(pipeline.dedup().history().records().await.unwrap().is_empty());
        assert!(queue.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_during_top_up_writes_nothing() {
        let dedup = Arc::new(DuplicationPrevention::new(Arc::new(MemoryHistoryStore::new())));
        let pipeline = RecommendationPipeline::builder(dedup)
            .planner(Arc::new(CancellingPlanner))
            .build();
        let queue = Arc::new(MemoryReviewQueue::new());
        let mut req = request(
            RecommendationSettings {
                queue_borderline_items: true,
                ..base_settings(3)
            },
            fixed_fetch(vec![
                Recommendation::new("Kept", "Debut", 0.9),
                Recommendation::new("Borderline", "Debut", 0.3),
            ]),
        );
        req.review_queue = queue.clone();

        let err = pipeline.run(req).await.unwrap_err();
        assert_eq!(err, PipelineError::Cancelled);
        assert!(pipeline.dedup().history().records().await.unwrap().is_empty());
        assert!(queue.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_artist_mode_promotes_when_no_candidate_has_ids() {
        let pipeline = pipeline_with(StaticLibrary::new(), Arc::new(StubPlanner::empty()), Arc::default());
        let settings = RecommendationSettings {
            recommendation_mode: RecommendationMode::Artists,
            require_mbids: true,
            backfill_strategy: BackfillStrategy::Off,
            ..base_settings(2)
        };

        let output = pipeline
            .run(request(
                settings,
                fixed_fetch(vec![
                    Recommendation::artist_only("Alvvays", 0.8),
                    Recommendation::artist_only("Slowdive", 0.95),
                    Recommendation::artist_only("Mitski", 0.9),
                ]),
            ))
            .await
            .unwrap();

        assert_eq!(pairs(&output.items), vec![("Slowdive", ""), ("Mitski", "")]);
        assert_eq!(output.stats.promoted, 2);
    }

    #[tokio::test]
    async fn test_artist_mode_keeps_identified_candidates_without_promotion() {
        let pipeline = pipeline_with(StaticLibrary::new(), Arc::new(StubPlanner::empty()), Arc::default());
        let settings = RecommendationSettings {
            recommendation_mode: RecommendationMode::Artists,
            require_mbids: true,
            backfill_strategy: BackfillStrategy::Off,
            ..base_settings(2)
        };

        let output = pipeline
            .run(request(
                settings,
                fixed_fetch(vec![
                    Recommendation::artist_only("Alvvays", 0.8).with_artist_mbid(ARTIST_ID),
                    Recommendation::artist_only("Slowdive", 0.95),
                ]),
            ))
            .await
            .unwrap();

        assert_eq!(pairs(&output.items), vec![("Alvvays", "")]);
        assert_eq!(output.stats.promoted, 0);
    }

    #[tokio::test]
    async fn test_album_mode_never_promotes() {
        let pipeline = pipeline_with(StaticLibrary::new(), Arc::new(StubPlanner::empty()), Arc::default());
        let settings = RecommendationSettings {
            recommendation_mode: RecommendationMode::Albums,
            require_mbids: true,
            backfill_strategy: BackfillStrategy::Off,
            ..base_settings(2)
        };

        let output = pipeline
            .run(request(
                settings,
                fixed_fetch(vec![Recommendation::new("Slowdive", "Souvlaki", 0.95)]),
            ))
            .await
            .unwrap();

        assert!(output.items.is_empty());
        assert_eq!(output.stats.shortfall(), 2);
    }

    #[tokio::test]
    async fn test_queue_failure_after_history_is_not_raised() {
        let pipeline = pipeline_with(StaticLibrary::new(), Arc::new(StubPlanner::empty()), Arc::default());
        let mut req = request(
            RecommendationSettings {
                queue_borderline_items: true,
                backfill_strategy: BackfillStrategy::Off,
                ..base_settings(1)
            },
            fixed_fetch(vec![
                Recommendation::new("Kept", "Debut", 0.9),
                Recommendation::new("Borderline", "Debut", 0.3),
            ]),
        );
        req.review_queue = Arc::new(ReadOnlyQueue);

        let output = pipeline.run(req).await.unwrap();
        assert_eq!(pairs(&output.items), vec![("Kept", "Debut")]);
        assert_eq!(output.stats.recorded, 1);
        assert_eq!(output.stats.queued, 0);
        assert_eq!(pipeline.dedup().history().records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_failure_leaves_queue_untouched() {
        let dedup = Arc::new(DuplicationPrevention::new(Arc::new(AppendFailingHistory::default())));
        let pipeline = RecommendationPipeline::builder(dedup)
            .planner(Arc::new(StubPlanner::empty()))
            .build();
        let queue = Arc::new(MemoryReviewQueue::new());
        let mut req = request(
            RecommendationSettings {
                queue_borderline_items: true,
                ..base_settings(1)
            },
            fixed_fetch(vec![
                Recommendation::new("Kept", "Debut", 0.9),
                Recommendation::new("Borderline", "Debut", 0.3),
            ]),
        );
        req.review_queue = queue.clone();

        let err = pipeline.run(req).await.unwrap_err();
        assert!(matches!(err, PipelineError::Store(_)));
        assert!(queue.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_meeting_target_logs_success() {
        let log = RunLog::new();
        let mut rx = log.subscribe();
        let dedup = Arc::new(DuplicationPrevention::new(Arc::new(MemoryHistoryStore::new())));
        let pipeline = RecommendationPipeline::builder(dedup)
            .planner(Arc::new(StubPlanner::empty()))
            .log(log)
            .build();

        pipeline
            .run(request(base_settings(1), fixed_fetch(vec![Recommendation::new("Kept", "Debut", 0.9)])))
            .await
            .unwrap();

        let mut levels = Vec::new();
        while let Ok(entry) = rx.try_recv() {
            levels.push(entry.level);
        }
        assert_eq!(levels.last(), Some(&LogLevel::Success));
    }
}
