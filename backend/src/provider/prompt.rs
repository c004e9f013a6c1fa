//! Prompt generation for recommendation requests.
//!
//! Builds the text sent to the provider from a library profile and the run
//! settings. Top-up prompts ask for the deficit only and list what was
//! already rejected so the model does not repeat it.

use crate::models::{LibraryProfile, ValidationResult};
use crate::settings::RecommendationSettings;

/// The recommendation JSON schema (embedded at compile time)
const RECOMMENDATION_SCHEMA: &str = include_str!("../../schemas/recommendation.json");

/// Rejected candidates listed in a top-up prompt.
const MAX_REJECTED_LISTED: usize = 20;

/// Prompt construction collaborator.
pub trait PromptBuilder: Send + Sync {
    fn build_prompt(&self, profile: &LibraryProfile, settings: &RecommendationSettings) -> String;

    /// Prompt asking for `needed` more items after a batch came up short.
    fn build_top_up_prompt(
        &self,
        profile: &LibraryProfile,
        settings: &RecommendationSettings,
        needed: usize,
        prior: &ValidationResult,
    ) -> String;
}

/// Default plain-text prompt builder.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplatePromptBuilder;

impl TemplatePromptBuilder {
    fn library_section(profile: &LibraryProfile, settings: &RecommendationSettings) -> String {
        let mut genres = profile.genres.clone();
        genres.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let genres: Vec<String> = genres
            .iter()
            .take(10)
            .map(|(genre, count)| format!("{} ({})", genre, count))
            .collect();

        let styles: Vec<&str> = settings
            .style_filters
            .iter()
            .take(settings.max_selected_styles as usize)
            .map(String::as_str)
            .collect();

        let style_rule = match (styles.is_empty(), settings.relax_style_matching) {
            (true, _) => "No style restriction.".to_string(),
            (false, false) => format!("Only recommend within these styles: {}.", styles.join(", ")),
            (false, true) => format!("Prefer these styles, adjacent styles are fine: {}.", styles.join(", ")),
        };

        format!(
            r#"## Library

- {artists} artists, {albums} albums
- Top genres: {genres}
- Top artists: {top}

{style_rule}"#,
            artists = profile.total_artists,
            albums = profile.total_albums,
            genres = if genres.is_empty() { "unknown".to_string() } else { genres.join(", ") },
            top = if profile.top_artists.is_empty() {
                "unknown".to_string()
            } else {
                profile.top_artists.iter().take(15).cloned().collect::<Vec<_>>().join(", ")
            },
        )
    }

    fn output_section(settings: &RecommendationSettings, count: usize) -> String {
        let shape = if settings.recommendation_mode.is_artist_mode() {
            "Recommend artists. Leave `album` empty."
        } else {
            "Recommend specific albums. Every item needs `artist` and `album`."
        };

        format!(
            r#"## Output

{shape}
Discovery: {discovery}. Sampling: {sampling}.
Return exactly {count} items as a JSON array, each matching this schema:

```json
{schema}
```

Return ONLY the JSON array. No explanations."#,
            discovery = settings.discovery_mode.as_str(),
            sampling = settings.sampling_strategy.as_str(),
            schema = RECOMMENDATION_SCHEMA.trim(),
        )
    }
}

impl PromptBuilder for TemplatePromptBuilder {
    fn build_prompt(&self, profile: &LibraryProfile, settings: &RecommendationSettings) -> String {
        format!(
            "You are a music curator. Suggest music this listener does not own yet.\n\n{}\n\n{}",
            Self::library_section(profile, settings),
            Self::output_section(settings, settings.target_count()),
        )
    }

    fn build_top_up_prompt(
        &self,
        profile: &LibraryProfile,
        settings: &RecommendationSettings,
        needed: usize,
        prior: &ValidationResult,
    ) -> String {
        let rejected: Vec<String> = prior
            .filtered_recommendations
            .iter()
            .chain(prior.valid_recommendations.iter())
            .take(MAX_REJECTED_LISTED)
            .map(|r| r.review_key())
            .collect();

        let avoid = if rejected.is_empty() {
            String::new()
        } else {
            format!("\n\nDo not repeat any of these:\n- {}", rejected.join("\n- "))
        };

        format!(
            "You are a music curator. A previous batch came up {needed} short; suggest {needed} more.\n\n{}{}\n\n{}",
            Self::library_section(profile, settings),
            avoid,
            Self::output_section(settings, needed),
        )
    }
}
