//! Single-flight execution: concurrent callers with the same key share one
//! in-flight computation.
//!
//! The first caller's future is boxed, made [`Shared`] and registered under
//! the key. Later callers await the same shared future instead of starting
//! their own. The entry is removed once the flight completes, so the next
//! call after completion runs fresh.
//!
//! The flight keeps going as long as any waiter polls it: a leader that is
//! dropped mid-flight does not strand the followers.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::Mutex;
use tracing::debug;

type Flight<T> = Shared<BoxFuture<'static, T>>;

/// Key-scoped single-flight group.
pub struct SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    inflight: Mutex<HashMap<String, Flight<T>>>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `op` under `key`, or join the flight already running under it.
    ///
    /// When joining, `op` is dropped without being polled.
    pub async fn run<F>(&self, key: &str, op: F) -> T
    where
        F: Future<Output = T> + Send + 'static,
    {
        let flight = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(key) {
                Some(existing) => {
                    debug!(key, "joining in-flight operation");
                    existing.clone()
                }
                None => {
                    let flight = op.boxed().shared();
                    inflight.insert(key.to_string(), flight.clone());
                    flight
                }
            }
        };

        let result = flight.clone().await;

        let mut inflight = self.inflight.lock().await;
        if inflight.get(key).is_some_and(|f| f.ptr_eq(&flight)) {
            inflight.remove(key);
        }
        result
    }

    /// Number of keys with a flight in progress.
    pub async fn in_flight(&self) -> usize {
        self.inflight.lock().await.len()
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
