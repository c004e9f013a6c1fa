//! Error types for the recommendation orchestration core.
//!
//! This module defines one error type per concern:
//!
//! - [`ConfigError`] - Invalid or unsupported settings
//! - [`ProviderError`] - Outbound provider call failures
//! - [`StoreError`] - History, review queue and cache persistence failures
//! - [`PipelineError`] - Top-level orchestration errors (including cancellation)
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.
//!
//! Every type here is `Clone`: a single-flight run hands the same outcome
//! to every waiter, errors included.

use thiserror::Error;

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors raised while validating [`crate::settings::RecommendationSettings`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    /// A numeric setting is outside its accepted range.
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    /// The provider cannot serve the requested configuration.
    #[error("Unsupported configuration for provider {provider}: {message}")]
    UnsupportedCombination { provider: String, message: String },

    /// Settings file could not be read or decoded.
    #[error("Failed to load settings: {0}")]
    Load(String),

    /// A run needs a provider but none was configured.
    #[error("No recommendation provider configured")]
    MissingProvider,
}

// =============================================================================
// Provider Errors
// =============================================================================

/// Errors from the external recommendation provider.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Network or transport failure.
    #[error("Provider request failed: {0}")]
    RequestFailed(String),

    /// The provider answered with something that is not a recommendation list.
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// Rate limited.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Call exceeded the configured timeout.
    #[error("Provider request timed out after {0} seconds")]
    Timeout(u64),

    /// The circuit for this provider/model is open.
    #[error("Circuit open for {resource}, retry in {retry_after_secs:.1}s")]
    CircuitOpen {
        resource: String,
        retry_after_secs: f64,
    },

    /// No further responses available (replay provider exhausted).
    #[error("Provider exhausted: {0}")]
    Exhausted(String),

    /// The call was abandoned because the run was cancelled.
    #[error("Provider call cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether this failure should count against the circuit breaker.
    ///
    /// Cancellation is the caller's choice, not a provider fault.
    pub fn is_provider_fault(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::CircuitOpen { .. })
    }
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors from the history store, review queue or cache.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// IO failure.
    #[error("Store IO error: {0}")]
    Io(String),

    /// Stored data could not be encoded or decoded.
    #[error("Store JSON error: {0}")]
    Json(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level orchestration errors.
///
/// This is the error type returned by
/// [`crate::coordinator::RecommendationCoordinator::get_recommendations`].
/// Data-quality problems never show up here: they are filtered and counted.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// Settings error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Primary fetch failed.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// History or review queue failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The run was cancelled. Not a failure.
    #[error("Recommendation run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// True when the run stopped because of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Provider(ProviderError::Cancelled)
        )
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for settings validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
