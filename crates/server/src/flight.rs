//! Single-flight coalescing keyed by cache key.
//!
//! The first caller for a key becomes the leader and spawns the work; callers
//! arriving while it runs join the same shared future. The work runs on its
//! own task, so it completes (and can populate the cache) even if every
//! caller goes away.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

/// The spawned work panicked or was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("in-flight task ended without a result")]
pub struct FlightAborted;

type Flight<T> = Shared<BoxFuture<'static, Result<T, FlightAborted>>>;

type Registry<T> = Arc<Mutex<HashMap<String, Flight<T>>>>;

/// Drops the registry entry when the work finishes, panics included.
struct Landing<T: Clone> {
    registry: Registry<T>,
    key: String,
}

impl<T: Clone> Drop for Landing<T> {
    fn drop(&mut self) {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.key);
    }
}

pub struct SingleFlight<T: Clone> {
    inflight: Registry<T>,
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self { inflight: Arc::default() }
    }
}

/// Whether a caller started the work or joined it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys with work currently running.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Run `work` for `key`, or join the run already in progress.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> (Result<T, FlightAborted>, Role)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (flight, role) = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            match inflight.get(key) {
                Some(flight) => (flight.clone(), Role::Follower),
                None => {
                    let task = work();
                    let landing = Landing { registry: Arc::clone(&self.inflight), key: key.to_string() };
                    // Removal takes the lock, so it cannot overtake the insert below.
                    let handle = tokio::spawn(async move {
                        let _landing = landing;
                        task.await
                    });

                    let flight = async move { handle.await.map_err(|_| FlightAborted) }.boxed().shared();
                    inflight.insert(key.to_string(), flight.clone());
                    (flight, Role::Leader)
                }
            }
        };

        if role == Role::Follower {
            tracing::debug!(key, "joined in-flight render");
        }
        (flight.await, role)
    }
}
