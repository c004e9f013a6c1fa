//! Recommendation request settings.
//!
//! [`RecommendationSettings`] is the single configuration struct consumed by
//! the coordinator, pipeline, safety gate and top-up planner. It loads from
//! JSON, has documented defaults and is checked by
//! [`RecommendationSettings::validate`] before a run starts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::models::{DiscoveryMode, RecommendationMode, SamplingStrategy};

// =============================================================================
// Provider
// =============================================================================

/// The AI backend that generates recommendations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum AiProvider {
    #[default]
    Ollama,
    LmStudio,
    OpenAi,
    Anthropic,
    Gemini,
    Groq,
    DeepSeek,
    Perplexity,
    OpenRouter,
}

impl AiProvider {
    /// Stable identifier used in cache keys and breaker resource names.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::LmStudio => "lmstudio",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Groq => "groq",
            Self::DeepSeek => "deepseek",
            Self::Perplexity => "perplexity",
            Self::OpenRouter => "openrouter",
        }
    }

    /// Model used when settings leave `model` empty.
    ///
    /// OpenRouter fronts hundreds of models and has no sensible default.
    pub fn default_model(&self) -> Option<&'static str> {
        match self {
            Self::Ollama => Some("qwen2.5:latest"),
            Self::LmStudio => Some("local-model"),
            Self::OpenAi => Some("gpt-4o-mini"),
            Self::Anthropic => Some("claude-3-5-haiku-latest"),
            Self::Gemini => Some("gemini-1.5-flash"),
            Self::Groq => Some("llama-3.3-70b-versatile"),
            Self::DeepSeek => Some("deepseek-chat"),
            Self::Perplexity => Some("sonar"),
            Self::OpenRouter => None,
        }
    }
}

impl fmt::Display for AiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

// =============================================================================
// Backfill
// =============================================================================

/// How hard the pipeline tries to refill a short batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum BackfillStrategy {
    Off,
    #[default]
    Standard,
    Aggressive,
}

impl BackfillStrategy {
    /// Maximum number of top-up rounds per run.
    pub fn max_rounds(&self) -> u32 {
        match self {
            Self::Off => 0,
            Self::Standard => 2,
            Self::Aggressive => 4,
        }
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Options for one recommendation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RecommendationSettings {
    // Request shape (participates in the cache key)
    pub provider: AiProvider,
    pub model: Option<String>,
    pub recommendation_mode: RecommendationMode,
    pub discovery_mode: DiscoveryMode,
    pub sampling_strategy: SamplingStrategy,
    pub max_recommendations: u32,
    pub max_selected_styles: u32,
    pub style_filters: Vec<String>,
    pub relax_style_matching: bool,

    // Safety gate
    /// Applied as `clamp(min_confidence, 0, 1)`.
    pub min_confidence: f64,
    pub require_mbids: bool,
    pub queue_borderline_items: bool,
    /// `Artist|Album` keys released from the review queue on the next run.
    pub review_approve_keys: Vec<String>,

    // Backfill and timing
    pub backfill_strategy: BackfillStrategy,
    /// 0 disables expiry.
    pub cache_duration_minutes: u64,
    pub request_timeout_secs: u64,

    // Cosmetic
    pub enable_debug_logging: bool,
    pub log_per_item_decisions: bool,
}

impl Default for RecommendationSettings {
    fn default() -> Self {
        Self {
            provider: AiProvider::default(),
            model: None,
            recommendation_mode: RecommendationMode::default(),
            discovery_mode: DiscoveryMode::default(),
            sampling_strategy: SamplingStrategy::default(),
            max_recommendations: 10,
            max_selected_styles: 5,
            style_filters: Vec::new(),
            relax_style_matching: false,
            min_confidence: 0.7,
            require_mbids: true,
            queue_borderline_items: true,
            review_approve_keys: Vec::new(),
            backfill_strategy: BackfillStrategy::default(),
            cache_duration_minutes: 60,
            request_timeout_secs: 30,
            enable_debug_logging: false,
            log_per_item_decisions: false,
        }
    }
}

const MAX_RECOMMENDATIONS_LIMIT: u32 = 100;
const MAX_STYLES_LIMIT: u32 = 10;
const TIMEOUT_RANGE_SECS: (u64, u64) = (5, 600);

impl RecommendationSettings {
    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
    }

    /// Model actually sent to the provider.
    pub fn effective_model(&self) -> Option<String> {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(String::from)
            .or_else(|| self.provider.default_model().map(String::from))
    }

    /// Confidence threshold actually applied by the safety gate.
    pub fn effective_min_confidence(&self) -> f64 {
        if self.min_confidence.is_nan() {
            return 0.0;
        }
        self.min_confidence.clamp(0.0, 1.0)
    }

    /// Target count as `usize`.
    pub fn target_count(&self) -> usize {
        self.max_recommendations as usize
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Cache TTL, `None` when expiry is disabled.
    pub fn cache_ttl(&self) -> Option<Duration> {
        match self.cache_duration_minutes {
            0 => None,
            minutes => Some(Duration::from_secs(minutes.saturating_mul(60))),
        }
    }

    /// Resource name for the circuit breaker: `provider:model`.
    pub fn breaker_resource(&self) -> String {
        format!(
            "{}:{}",
            self.provider.id(),
            self.effective_model().unwrap_or_else(|| "default".to_string())
        )
    }

    /// Check ranges and provider/model combinations.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(1..=MAX_RECOMMENDATIONS_LIMIT).contains(&self.max_recommendations) {
            return Err(ConfigError::InvalidValue {
                field: "max_recommendations".into(),
                message: format!("must be between 1 and {}", MAX_RECOMMENDATIONS_LIMIT),
            });
        }

        if self.max_selected_styles > MAX_STYLES_LIMIT {
            return Err(ConfigError::InvalidValue {
                field: "max_selected_styles".into(),
                message: format!("must be at most {}", MAX_STYLES_LIMIT),
            });
        }

        let (min_timeout, max_timeout) = TIMEOUT_RANGE_SECS;
        if !(min_timeout..=max_timeout).contains(&self.request_timeout_secs) {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_secs".into(),
                message: format!("must be between {} and {}", min_timeout, max_timeout),
            });
        }

        if !self.min_confidence.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "min_confidence".into(),
                message: "must be a finite number".into(),
            });
        }

        if self.effective_model().is_none() {
            return Err(ConfigError::UnsupportedCombination {
                provider: self.provider.to_string(),
                message: "this provider has no default model; set `model` explicitly".into(),
            });
        }

        Ok(())
    }
}
