//! # Circuit Breaker
//!
//! Per-resource failure isolation for outbound provider calls. A resource is
//! named `provider:model`.
//!
//! ```text
//!            consecutive failures >= threshold
//!            or failure rate >= threshold (window full enough)
//!   Closed ─────────────────────────────────────────────► Open
//!     ▲                                                    │
//!     │ trial succeeds                      cooldown elapsed│
//!     │                                                    ▼
//!     └──────────────────────────────────────────────── HalfOpen
//!                        trial fails ──► Open
//! ```
//!
//! While Open, [`CircuitBreaker::execute`] fails fast with
//! [`BreakerError::Open`] without running the operation. Thresholds and the
//! cooldown come from [`BreakerConfig`].
//!
//! Breakers are handed out by a [`BreakerRegistry`] that the composition root
//! constructs and injects. Tests that need to wipe state use
//! [`TestBreakerRegistry`].

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Transition thresholds and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Failure ratio over the window that opens the circuit.
    pub failure_rate_threshold: f64,
    /// Calls recorded in the window before the rate rule applies.
    pub minimum_calls: usize,
    /// Trailing outcomes kept for the failure rate.
    pub window_size: usize,
    #[serde(with = "duration_secs")]
    pub cooldown: Duration,
    /// Calls admitted while HalfOpen.
    pub half_open_trials: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate_threshold: 0.5,
            minimum_calls: 10,
            window_size: 20,
            cooldown: Duration::from_secs(60),
            half_open_trials: 1,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

// =============================================================================
// State
// =============================================================================

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSnapshot {
    pub resource: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_rate: f64,
    pub since_state_change: Duration,
}

/// Failure returned by [`CircuitBreaker::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum BreakerError<E> {
    /// The circuit is open; the operation was not run.
    Open {
        resource: String,
        retry_after: Duration,
    },

    /// The operation ran and failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open {
                resource,
                retry_after,
            } => write!(
                f,
                "circuit open for {}, retry in {:.1}s",
                resource,
                retry_after.as_secs_f64()
            ),
            Self::Inner(err) => err.fmt(f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { .. } => None,
            Self::Inner(err) => Some(err),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    /// `true` = failure.
    window: VecDeque<bool>,
    last_state_change: Instant,
    trials_in_flight: u32,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            window: VecDeque::new(),
            last_state_change: Instant::now(),
            trials_in_flight: 0,
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|f| **f).count();
        failures as f64 / self.window.len() as f64
    }

    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.last_state_change = Instant::now();
        self.trials_in_flight = 0;
        if to == CircuitState::Closed {
            self.consecutive_failures = 0;
            self.window.clear();
        }
    }
}

// =============================================================================
// Circuit Breaker
// =============================================================================

/// Breaker guarding one resource.
#[derive(Debug)]
pub struct CircuitBreaker {
    resource: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(resource: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            resource: resource.into(),
            config,
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state. An Open breaker whose cooldown has elapsed reports
    /// HalfOpen.
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        match inner.state {
            CircuitState::Open if inner.last_state_change.elapsed() >= self.config.cooldown => {
                CircuitState::HalfOpen
            }
            state => state,
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state();
        let inner = self.lock();
        BreakerSnapshot {
            resource: self.resource.clone(),
            state,
            consecutive_failures: inner.consecutive_failures,
            failure_rate: inner.failure_rate(),
            since_state_change: inner.last_state_change.elapsed(),
        }
    }

    /// Admit one call, or return how long until the next attempt may run.
    fn try_acquire(&self) -> Result<(), Duration> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner.last_state_change.elapsed();
                if elapsed < self.config.cooldown {
                    return Err(self.config.cooldown - elapsed);
                }
                debug!(resource = %self.resource, "circuit half-open");
                inner.transition(CircuitState::HalfOpen);
                inner.trials_in_flight = 1;
                Ok(())
            }
            CircuitState::HalfOpen => {
                if inner.trials_in_flight < self.config.half_open_trials {
                    inner.trials_in_flight += 1;
                    Ok(())
                } else {
                    Err(Duration::ZERO)
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                debug!(resource = %self.resource, "circuit closed after trial success");
                inner.transition(CircuitState::Closed);
            }
            _ => {
                inner.consecutive_failures = 0;
                self.push_outcome(&mut inner, false);
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                warn!(resource = %self.resource, "trial call failed, circuit re-opened");
                inner.transition(CircuitState::Open);
            }
            CircuitState::Open => {}
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                self.push_outcome(&mut inner, true);

                let by_count = inner.consecutive_failures >= self.config.failure_threshold;
                let by_rate = inner.window.len() >= self.config.minimum_calls
                    && inner.failure_rate() >= self.config.failure_rate_threshold;
                if by_count || by_rate {
                    warn!(
                        resource = %self.resource,
                        consecutive_failures = inner.consecutive_failures,
                        failure_rate = inner.failure_rate(),
                        "circuit opened"
                    );
                    inner.transition(CircuitState::Open);
                }
            }
        }
    }

    /// Give back a HalfOpen trial slot for a call whose outcome says nothing
    /// about the resource (e.g. the caller cancelled).
    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }
    }

    fn push_outcome(&self, inner: &mut Inner, failed: bool) {
        inner.window.push_back(failed);
        while inner.window.len() > self.config.window_size.max(1) {
            inner.window.pop_front();
        }
    }

    /// Run `op` if the circuit admits it. Every `Err` counts as a failure.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_when(op, |_| true).await
    }

    /// Like [`execute`](Self::execute), counting only errors for which
    /// `is_failure` returns true.
    pub async fn execute_when<T, E, F, Fut, P>(
        &self,
        op: F,
        is_failure: P,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        if let Err(retry_after) = self.try_acquire() {
            return Err(BreakerError::Open {
                resource: self.resource.clone(),
                retry_after,
            });
        }

        // Released on drop unless an outcome is recorded first.
        let trial = TrialSlot::new(self);
        let result = op().await;
        trial.settle();

        match result {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if is_failure(&err) {
                    self.record_failure();
                } else {
                    self.release_trial();
                }
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Run `op`, returning `fallback` on fast-fail or failure.
    pub async fn execute_with_fallback<T, E, F, Fut>(&self, op: F, fallback: T) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        match self.execute(op).await {
            Ok(value) => value,
            Err(err) => {
                warn!(resource = %self.resource, error = %err, "using fallback");
                fallback
            }
        }
    }

    #[cfg(any(test, feature = "test-util"))]
    fn reset(&self) {
        *self.lock() = Inner::new();
    }
}

/// An admitted call whose outcome has not been recorded yet. Dropping it
/// unsettled (the caller abandoned the future) gives the trial slot back.
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl<'a> TrialSlot<'a> {
    fn new(breaker: &'a CircuitBreaker) -> Self {
        Self {
            breaker,
            settled: false,
        }
    }

    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(resource = %self.breaker.resource, "call abandoned, releasing trial slot");
            self.breaker.release_trial();
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Hands out one shared breaker per resource name.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_or_create(&self, resource: &str) -> Arc<CircuitBreaker> {
        self.lock()
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(resource, self.config.clone())))
            .clone()
    }

    /// Snapshots of every breaker, sorted by resource.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<Arc<CircuitBreaker>> = self.lock().values().cloned().collect();
        let mut snapshots: Vec<BreakerSnapshot> = breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.resource.cmp(&b.resource));
        snapshots
    }
}

/// Registry wrapper exposing a reset hook for tests.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Default)]
pub struct TestBreakerRegistry {
    registry: Arc<BreakerRegistry>,
}

#[cfg(any(test, feature = "test-util"))]
impl TestBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            registry: Arc::new(BreakerRegistry::new(config)),
        }
    }

    /// The shared registry to inject into code under test.
    pub fn registry(&self) -> Arc<BreakerRegistry> {
        self.registry.clone()
    }

    /// Return every breaker to Closed with empty history.
    pub fn reset_for_testing(&self) {
        for breaker in self.registry.lock().values() {
            breaker.reset();
        }
    }
}
