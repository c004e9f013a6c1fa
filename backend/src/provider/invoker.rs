//! Breaker-guarded provider invocation.
//!
//! One path for every outbound call, primary fetch and top-up alike:
//!
//! 1. bail out if the token is already cancelled (the breaker is untouched)
//! 2. ask the `provider:model` breaker for admission
//! 3. race the call against the token and the request timeout
//! 4. record the outcome; cancellation does not count against the provider

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ProviderHealth, RecommendationProvider};
use crate::breaker::{BreakerError, BreakerRegistry, BreakerSnapshot};
use crate::error::{ProviderError, ProviderResult};
use crate::models::Recommendation;
use crate::settings::RecommendationSettings;

/// Provider health plus the breaker's view of it.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub provider: String,
    pub health: ProviderHealth,
    pub breaker: BreakerSnapshot,
}

/// Invokes providers through the breaker registry.
#[derive(Debug, Clone)]
pub struct ProviderInvoker {
    breakers: Arc<BreakerRegistry>,
}

impl ProviderInvoker {
    pub fn new(breakers: Arc<BreakerRegistry>) -> Self {
        Self { breakers }
    }

    pub async fn invoke(
        &self,
        provider: &dyn RecommendationProvider,
        prompt: &str,
        settings: &RecommendationSettings,
        cancel: &CancellationToken,
    ) -> ProviderResult<Vec<Recommendation>> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        let resource = settings.breaker_resource();
        let breaker = self.breakers.get_or_create(&resource);
        let timeout = settings.request_timeout();

        let outcome = breaker
            .execute_when(
                || async move {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
                        result = tokio::time::timeout(
                            timeout,
                            provider.get_recommendations_cancellable(prompt, cancel),
                        ) => match result {
                            Ok(inner) => inner,
                            Err(_) => Err(ProviderError::Timeout(timeout.as_secs())),
                        },
                    }
                },
                ProviderError::is_provider_fault,
            )
            .await;

        match outcome {
            Ok(recommendations) => {
                debug!(
                    provider = provider.name(),
                    resource = %resource,
                    count = recommendations.len(),
                    "provider call succeeded"
                );
                Ok(recommendations)
            }
            Err(BreakerError::Open {
                resource,
                retry_after,
            }) => {
                warn!(resource = %resource, "provider call skipped, circuit open");
                Err(ProviderError::CircuitOpen {
                    resource,
                    retry_after_secs: retry_after.as_secs_f64(),
                })
            }
            Err(BreakerError::Inner(err)) => {
                if err != ProviderError::Cancelled {
                    warn!(provider = provider.name(), resource = %resource, error = %err, "provider call failed");
                }
                Err(err)
            }
        }
    }

    /// Run the provider's connectivity check and pair it with breaker state.
    pub async fn health(
        &self,
        provider: &dyn RecommendationProvider,
        settings: &RecommendationSettings,
    ) -> HealthReport {
        let health = provider.test_connection().await;
        let breaker = self.breakers.get_or_create(&settings.breaker_resource());
        HealthReport {
            provider: provider.name().to_string(),
            health,
            breaker: breaker.snapshot(),
        }
    }
}
