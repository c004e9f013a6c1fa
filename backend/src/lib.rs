//! # Brainarr - recommendation orchestration for AI-driven import lists
//!
//! Brainarr asks a language-model provider for music recommendations, then
//! cleans, gates and de-duplicates the answer into import-list items a
//! library manager can act on.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Coordinator │────▶│  Pipeline   │────▶│ Safety Gate │────▶│    Dedup    │
//! │ (cache, SF) │     │ (validate)  │     │ (conf, ids) │     │ (hist, lib) │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │                                       │
//!        │                   ▼                                       ▼
//!        │            ┌─────────────┐                         ┌─────────────┐
//!        └───────────▶│  Provider   │◀────────────────────────│   Top-up    │
//!                     │ (breakered) │                         │  (backfill) │
//!                     └─────────────┘                         └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use brainarr::{RecommendationCoordinator, RecommendationPipeline, DuplicationPrevention};
//!
//! let dedup = Arc::new(DuplicationPrevention::new(history));
//! let pipeline = RecommendationPipeline::builder(dedup.clone()).library(library).build();
//! let coordinator = RecommendationCoordinator::builder(Arc::new(pipeline), dedup)
//!     .provider(provider)
//!     .build();
//! let items = coordinator.get_recommendations(&settings, &profile, &cancel).await?;
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types per layer
//! - [`models`] - Recommendations, import-list items, library profile
//! - [`settings`] - User-facing settings and validation
//! - [`logs`] - Run log broadcast over `tracing`
//! - [`cache`] - Cache keys and the result cache
//! - [`breaker`] - Per-resource circuit breakers
//! - [`provider`] - Provider seam, prompts, breaker-guarded invocation
//! - [`validation`] - Sanitization and schema checks
//! - [`safety`] - Confidence and identifier gates, review queue plumbing
//! - [`dedup`] - Fingerprints, history filter, single-flight
//! - [`store`] - History and review queue persistence
//! - [`pipeline`] - The per-run stage sequence and top-up
//! - [`coordinator`] - Cache plus single-flight entry point

// Core
pub mod error;
pub mod models;
pub mod settings;
pub mod logs;

// Infrastructure
pub mod breaker;
pub mod cache;
pub mod store;

// Provider
pub mod provider;

// Stages
pub mod validation;
pub mod safety;
pub mod dedup;
pub mod pipeline;

// Entry point
pub mod coordinator;

#[cfg(test)]
mod test_support;

// =============================================================================
// Re-exports - Errors
// =============================================================================

pub use error::{
    ConfigError, ConfigResult, PipelineError, PipelineResult, ProviderError, ProviderResult,
    StoreError, StoreResult,
};

// =============================================================================
// Re-exports - Models and settings
// =============================================================================

pub use models::{
    ImportListItemInfo, LibraryProfile, Recommendation, RecommendationMode, ValidationResult,
};
pub use settings::{AiProvider, BackfillStrategy, RecommendationSettings};

// =============================================================================
// Re-exports - Services
// =============================================================================

pub use breaker::{BreakerConfig, BreakerRegistry, CircuitBreaker, CircuitState};
pub use cache::{CacheKeyBuilder, MemoryCache, RecommendationCache};
pub use coordinator::{CoordinatorBuilder, RecommendationCoordinator};
pub use dedup::DuplicationPrevention;
pub use logs::{LogEntry, LogLevel, RunLog};
pub use pipeline::{PipelineOutput, PipelineRunner, RecommendationPipeline, TopUpPlanner};
pub use provider::{
    LibraryCollaborator, ProviderInvoker, RecommendationProvider, ReplayProvider, StaticLibrary,
};
pub use safety::SafetyGateService;
pub use store::{HistoryStore, JsonHistoryStore, JsonReviewQueue, ReviewQueue};
pub use validation::{SchemaValidator, Validator};
