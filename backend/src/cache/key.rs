//! Cache key derivation.
//!
//! A key is a SHA-256 digest over a canonical, line-oriented description of
//! every setting that changes the content of a provider call, plus the
//! canonical library profile. Style filters are trimmed, lower-cased,
//! deduplicated and sorted first, so permuting or re-casing them keeps the
//! key. Cosmetic settings (debug logging, per-item logging) and post-call
//! policy (confidence, identifier gate, review keys) are left out.

use sha2::{Digest, Sha256};

use crate::models::LibraryProfile;
use crate::settings::RecommendationSettings;

/// Prefix so keys are recognisable in a shared cache.
const KEY_PREFIX: &str = "brainarr:v1:";

/// Stand-in for missing or blank values.
const PLACEHOLDER: &str = "<none>";

/// Builds stable, order-independent cache keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    /// Derive the key for `settings` against `profile`. Never fails.
    pub fn build_key(settings: &RecommendationSettings, profile: &LibraryProfile) -> String {
        let canonical = Self::canonical_form(settings, profile);
        let digest = Sha256::digest(canonical.as_bytes());
        format!("{}{}", KEY_PREFIX, hex::encode(digest))
    }

    /// Operation identifier for single-flight grouping: same logical request,
    /// same flight.
    pub fn operation_id(settings: &RecommendationSettings, profile: &LibraryProfile) -> String {
        format!("recommend:{}", Self::build_key(settings, profile))
    }

    /// The pre-hash text. Exposed for diagnostics.
    pub fn canonical_form(settings: &RecommendationSettings, profile: &LibraryProfile) -> String {
        let model = settings.effective_model();
        let styles = normalized_styles(&settings.style_filters);

        let profile_digest = hex::encode(Sha256::digest(profile.canonical_string().as_bytes()));

        [
            format!("provider={}", settings.provider.id()),
            format!("model={}", placeholder_or(model.as_deref().map(str::to_lowercase).as_deref())),
            format!("mode={}", settings.recommendation_mode.as_str()),
            format!("discovery={}", settings.discovery_mode.as_str()),
            format!("sampling={}", settings.sampling_strategy.as_str()),
            format!("max={}", settings.max_recommendations),
            format!("max_styles={}", settings.max_selected_styles),
            format!(
                "styles={}",
                if styles.is_empty() {
                    PLACEHOLDER.to_string()
                } else {
                    styles.join(",")
                }
            ),
            format!("relax={}", settings.relax_style_matching),
            format!("library={}", profile_digest),
        ]
        .join("\n")
    }
}

/// Trimmed, lower-cased, deduplicated and sorted style filters.
fn normalized_styles(filters: &[String]) -> Vec<String> {
    let mut styles: Vec<String> = filters
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    styles.sort();
    styles.dedup();
    styles
}

fn placeholder_or(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => PLACEHOLDER.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiscoveryMode, RecommendationMode, SamplingStrategy};
    use crate::settings::{AiProvider, BackfillStrategy};

    fn profile() -> LibraryProfile {
        LibraryProfile {
            total_artists: 120,
            total_albums: 480,
            genres: vec![("Indie Rock".into(), 40), ("Jazz".into(), 12), ("Ambient".into(), 7)],
            top_artists: vec!["Radiohead".into(), "Arctic Monkeys".into(), "Björk".into()],
            styles: vec!["shoegaze".into(), "post-punk".into()],
        }
    }

    fn key(settings: &RecommendationSettings) -> String {
        CacheKeyBuilder::build_key(settings, &profile())
    }

    #[test]
    fn test_key_is_deterministic() {
        let settings = RecommendationSettings::default();
        assert_eq!(key(&settings), key(&settings));
        assert!(key(&settings).starts_with(KEY_PREFIX));
    }

    #[test]
    fn test_style_filter_order_and_case_ignored() {
        let a = RecommendationSettings {
            style_filters: vec!["Shoegaze".into(), "dream pop".into(), "Post-Punk".into()],
            ..RecommendationSettings::default()
        };
        let b = RecommendationSettings {
            style_filters: vec!["post-punk".into(), " SHOEGAZE ".into(), "Dream Pop".into()],
            ..RecommendationSettings::default()
        };
        assert_eq!(key(&a), key(&b));
    }

    #[test]
    fn test_profile_order_ignored() {
        let settings = RecommendationSettings::default();
        let mut reordered = profile();
        reordered.genres.reverse();
        reordered.top_artists.reverse();
        reordered.styles.reverse();
        assert_eq!(
            CacheKeyBuilder::build_key(&settings, &profile()),
            CacheKeyBuilder::build_key(&settings, &reordered)
        );
    }

    #[test]
    fn test_semantic_settings_change_key() {
        let base = RecommendationSettings::default();
        let variants = vec![
            RecommendationSettings { provider: AiProvider::Anthropic, ..base.clone() },
            RecommendationSettings { model: Some("llama3.1:8b".into()), ..base.clone() },
            RecommendationSettings { recommendation_mode: RecommendationMode::Artists, ..base.clone() },
            RecommendationSettings { discovery_mode: DiscoveryMode::Exploratory, ..base.clone() },
            RecommendationSettings { sampling_strategy: SamplingStrategy::Comprehensive, ..base.clone() },
            RecommendationSettings { max_recommendations: 25, ..base.clone() },
            RecommendationSettings { max_selected_styles: 2, ..base.clone() },
            RecommendationSettings { style_filters: vec!["jazz".into()], ..base.clone() },
            RecommendationSettings { relax_style_matching: true, ..base.clone() },
        ];

        let base_key = key(&base);
        for variant in &variants {
            assert_ne!(key(variant), base_key, "expected key change for {:?}", variant);
        }
    }

    #[test]
    fn test_cosmetic_and_policy_settings_do_not_change_key() {
        let base = RecommendationSettings::default();
        let cosmetic = RecommendationSettings {
            enable_debug_logging: true,
            log_per_item_decisions: true,
            min_confidence: 0.2,
            review_approve_keys: vec!["A|B".into()],
            backfill_strategy: BackfillStrategy::Aggressive,
            ..base.clone()
        };
        assert_eq!(key(&base), key(&cosmetic));
    }

    #[test]
    fn test_library_change_changes_key() {
        let settings = RecommendationSettings::default();
        let mut grown = profile();
        grown.total_albums += 1;
        assert_ne!(
            CacheKeyBuilder::build_key(&settings, &profile()),
            CacheKeyBuilder::build_key(&settings, &grown)
        );
    }

    #[test]
    fn test_duplicate_genre_counts_do_not_overflow() {
        let settings = RecommendationSettings::default();
        let huge = LibraryProfile {
            genres: vec![("Rock".into(), u32::MAX), ("rock".into(), 1)],
            ..profile()
        };
        assert!(CacheKeyBuilder::build_key(&settings, &huge).starts_with(KEY_PREFIX));
        assert!(huge.canonical_string().contains("rock=4294967296"));
    }

    #[test]
    fn test_missing_model_uses_placeholder() {
        let settings = RecommendationSettings {
            provider: AiProvider::OpenRouter,
            model: None,
            ..RecommendationSettings::default()
        };
        let canonical = CacheKeyBuilder::canonical_form(&settings, &LibraryProfile::default());
        assert!(canonical.contains("model=<none>"));
        assert!(canonical.contains("styles=<none>"));
    }
}
