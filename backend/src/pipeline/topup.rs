//! Top-up (backfill) planning.
//!
//! One planner call is one bounded unit of work: a single provider request
//! for the deficit, filtered the same way as the primary batch. The pipeline
//! decides whether to call again.
//!
//! The planner never fails. A missing provider, a provider error, a store
//! error or cancellation all yield an empty result.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::library_filter::LibraryIndex;
use crate::dedup::{fingerprint_of, DuplicationPrevention};
use crate::logs::RunLog;
use crate::models::{ImportListItemInfo, LibraryProfile, ValidationResult};
use crate::provider::{LibraryCollaborator, PromptBuilder, ProviderInvoker, RecommendationProvider};
use crate::safety::has_required_identifiers;
use crate::settings::RecommendationSettings;
use crate::validation::Validator;

const STAGE: &str = "topup";

/// Everything one top-up call needs.
pub struct TopUpRequest<'a> {
    pub settings: &'a RecommendationSettings,
    pub provider: Option<&'a dyn RecommendationProvider>,
    pub library: &'a dyn LibraryCollaborator,
    pub prompt_builder: &'a dyn PromptBuilder,
    pub dedup: &'a DuplicationPrevention,
    pub profile: &'a LibraryProfile,
    /// Items still missing to reach the target.
    pub needed: usize,
    /// Validation result of the primary batch.
    pub prior: &'a ValidationResult,
    /// Fingerprints already in the working set.
    pub exclude: &'a HashSet<String>,
    pub cancel: &'a CancellationToken,
}

/// Backfill collaborator.
#[async_trait]
pub trait TopUpPlanner: Send + Sync {
    /// At most `request.needed` new items, never an error.
    async fn top_up(&self, request: TopUpRequest<'_>) -> Vec<ImportListItemInfo>;
}

/// Planner that asks the provider through the breaker-guarded invoker.
pub struct ProviderTopUpPlanner {
    invoker: ProviderInvoker,
    validator: Arc<dyn Validator>,
    log: RunLog,
}

impl ProviderTopUpPlanner {
    pub fn new(invoker: ProviderInvoker, validator: Arc<dyn Validator>, log: RunLog) -> Self {
        Self {
            invoker,
            validator,
            log,
        }
    }
}

#[async_trait]
impl TopUpPlanner for ProviderTopUpPlanner {
    async fn top_up(&self, request: TopUpRequest<'_>) -> Vec<ImportListItemInfo> {
        let TopUpRequest {
            settings,
            provider,
            library,
            prompt_builder,
            dedup,
            profile,
            needed,
            prior,
            exclude,
            cancel,
        } = request;

        if needed == 0 || cancel.is_cancelled() {
            return Vec::new();
        }
        let Some(provider) = provider else {
            self.log.warning(STAGE, "no provider available for top-up");
            return Vec::new();
        };

        let prompt = prompt_builder.build_top_up_prompt(profile, settings, needed, prior);
        let raw = match self.invoker.invoke(provider, &prompt, settings, cancel).await {
            Ok(raw) => raw,
            Err(err) => {
                self.log.warning(STAGE, format!("top-up call failed: {}", err));
                return Vec::new();
            }
        };
        if cancel.is_cancelled() {
            return Vec::new();
        }

        let mode = settings.recommendation_mode;
        let threshold = settings.effective_min_confidence();
        let validated = self
            .validator
            .validate_batch(raw, mode.is_artist_mode())
            .valid_recommendations;

        let gated: Vec<_> = validated
            .into_iter()
            .filter(|r| r.confidence >= threshold)
            .filter(|r| !settings.require_mbids || has_required_identifiers(r, mode))
            .collect();

        let fresh = match dedup.filter_previously_recommended(gated, &HashSet::new()).await {
            Ok(fresh) => fresh,
            Err(err) => {
                self.log.warning(STAGE, format!("history unavailable: {}", err));
                return Vec::new();
            }
        };

        let unseen: Vec<_> = fresh
            .into_iter()
            .filter(|r| !exclude.contains(&fingerprint_of(r)))
            .collect();
        let unique = dedup.deduplicate_recommendations(unseen);

        let index = LibraryIndex::load(library).await;
        let mut items: Vec<ImportListItemInfo> = index
            .filter(unique, mode)
            .iter()
            .map(ImportListItemInfo::from)
            .collect();
        items.truncate(needed);

        self.log.summary(
            settings.enable_debug_logging,
            STAGE,
            format!("{} of {} needed items supplied", items.len(), needed),
        );
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerRegistry;
    use crate::models::Recommendation;
    use crate::provider::{ReplayProvider, StaticLibrary, TemplatePromptBuilder};
    use crate::store::{HistoryRecord, MemoryHistoryStore};
    use crate::validation::SchemaValidator;
    use serde_json::json;
    use uuid::Uuid;

    fn planner() -> ProviderTopUpPlanner {
        ProviderTopUpPlanner::new(
            ProviderInvoker::new(Arc::new(BreakerRegistry::default())),
            Arc::new(SchemaValidator::new()),
            RunLog::new(),
        )
    }

    fn settings() -> RecommendationSettings {
        RecommendationSettings {
            require_mbids: false,
            ..RecommendationSettings::default()
        }
    }

    struct Fixture {
        settings: RecommendationSettings,
        library: StaticLibrary,
        dedup: DuplicationPrevention,
        profile: LibraryProfile,
        prior: ValidationResult,
        exclude: HashSet<String>,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                settings: settings(),
                library: StaticLibrary::new(),
                dedup: DuplicationPrevention::new(Arc::new(MemoryHistoryStore::new())),
                profile: LibraryProfile::default(),
                prior: ValidationResult::default(),
                exclude: HashSet::new(),
                cancel: CancellationToken::new(),
            }
        }

        fn request<'a>(
            &'a self,
            provider: Option<&'a dyn RecommendationProvider>,
            needed: usize,
        ) -> TopUpRequest<'a> {
            TopUpRequest {
                settings: &self.settings,
                provider,
                library: &self.library,
                prompt_builder: &TemplatePromptBuilder,
                dedup: &self.dedup,
                profile: &self.profile,
                needed,
                prior: &self.prior,
                exclude: &self.exclude,
                cancel: &self.cancel,
            }
        }
    }

    #[tokio::test]
    async fn test_no_provider_yields_empty() {
        let fixture = Fixture::new();
        assert!(planner().top_up(fixture.request(None, 3)).await.is_empty());
    }

    #[tokio::test]
    async fn test_provider_error_yields_empty() {
        let fixture = Fixture::new();
        let provider = ReplayProvider::new(vec![json!("not json at all")]);
        assert!(planner().top_up(fixture.request(Some(&provider), 3)).await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_yields_empty_without_calling() {
        let fixture = Fixture::new();
        fixture.cancel.cancel();
        let provider = ReplayProvider::new(vec![json!([{"artist": "A", "album": "B", "confidence": 0.9}])]);
        assert!(planner().top_up(fixture.request(Some(&provider), 1)).await.is_empty());
        assert_eq!(provider.remaining().await, 1);
    }

    #[tokio::test]
    async fn test_filters_and_truncates_to_needed() {
        let mut fixture = Fixture::new();
        fixture.library = StaticLibrary::new().with_album("Arctic Monkeys", "The Car");
        fixture.dedup = DuplicationPrevention::new(Arc::new(MemoryHistoryStore::with_records(vec![
            HistoryRecord::from_item(&Recommendation::new("SZA", "SOS", 0.9), Uuid::new_v4()),
        ])));
        fixture.exclude.insert(fingerprint_of(&Recommendation::new("Lana Del Rey", "Ocean Blvd", 0.9)));

        let provider = ReplayProvider::new(vec![json!([
            {"artist": "Arctic Monkeys", "album": "The Car", "confidence": 0.9},
            {"artist": "SZA", "album": "SOS", "confidence": 0.9},
            {"artist": "Lana Del Rey", "album": "Ocean Blvd", "confidence": 0.9},
            {"artist": "Low Confidence", "album": "Maybe", "confidence": 0.2},
            {"artist": "Phoebe Bridgers", "album": "Punisher", "confidence": 0.9},
            {"artist": "phoebe bridgers", "album": "PUNISHER", "confidence": 0.8},
            {"artist": "Boygenius", "album": "The Record", "confidence": 0.9},
            {"artist": "Big Thief", "album": "Capacity", "confidence": 0.9}
        ])]);

        let items = planner().top_up(fixture.request(Some(&provider), 2)).await;
        let pairs: Vec<(&str, &str)> = items.iter().map(|i| (i.artist.as_str(), i.album.as_str())).collect();
        assert_eq!(pairs, vec![("Phoebe Bridgers", "Punisher"), ("Boygenius", "The Record")]);
    }

    #[tokio::test]
    async fn test_identifier_gate_applies_when_required() {
        let mut fixture = Fixture::new();
        fixture.settings.require_mbids = true;
        let provider = ReplayProvider::new(vec![json!([
            {"artist": "No Ids", "album": "Here", "confidence": 0.9},
            {
                "artist": "Has Ids", "album": "Here", "confidence": 0.9,
                "artistMbid": "a74b1b7f-71a5-4011-9441-d0b5e4122711",
                "albumMbid": "0c6ea8a7-5c9c-4b8d-9ad8-1b4f8e7c2d10"
            }
        ])]);
        let items = planner().top_up(fixture.request(Some(&provider), 5)).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].artist, "Has Ids");
    }
}
