//! TTL-enforcing front for any cache backend.

use super::clock::{Clock, SystemClock};
use super::{CacheBackend, CacheEntry, ConnectionState};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Render cache shared by all requests.
///
/// Reads and writes never fail from the caller's point of view: backend
/// errors degrade to a miss (read) or a no-op (write) and are logged.
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl Cache {
    /// Wrap `backend`, treating entries older than `ttl` as absent.
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { backend, ttl, clock: Arc::new(SystemClock) }
    }

    /// Replace the wall clock, e.g. with a [`ManualClock`](super::ManualClock).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn state(&self) -> ConnectionState {
        self.backend.state()
    }

    /// Look up a fresh entry.
    ///
    /// Returns `None` when the key was never written, the write failed, the
    /// backend is unreachable, or the TTL has elapsed since the entry was created.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let entry = match self.backend.load(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::debug!(backend = self.backend.name(), key, "cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(backend = self.backend.name(), key, error = %e, "cache read failed; treating as miss");
                return None;
            }
        };

        if entry.is_fresh(self.now(), self.ttl) {
            tracing::debug!(backend = self.backend.name(), key, "cache hit");
            return Some(entry);
        }

        tracing::debug!(backend = self.backend.name(), key, created_at = %entry.created_at, "cache entry expired");
        if let Err(e) = self.backend.remove(key).await {
            tracing::debug!(backend = self.backend.name(), key, error = %e, "failed to drop expired entry");
        }
        None
    }

    /// Persist an entry.
    ///
    /// Returns whether the backend accepted the write.
    pub async fn set(&self, entry: CacheEntry) -> bool {
        match self.backend.store(&entry, self.ttl).await {
            Ok(()) => {
                tracing::debug!(backend = self.backend.name(), key = %entry.key, "saved cache entry");
                true
            }
            Err(e) => {
                tracing::warn!(
                    backend = self.backend.name(),
                    key = %entry.key,
                    error = %e,
                    "cache write failed; response unaffected"
                );
                false
            }
        }
    }

    /// Delete every expired entry.
    ///
    /// Returns the number of deleted entries (0 if the sweep failed).
    pub async fn purge_expired(&self) -> u64 {
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        let Some(cutoff) = self.now().checked_sub_signed(ttl) else {
            return 0;
        };

        match self.backend.purge_older_than(cutoff).await {
            Ok(deleted) => {
                tracing::debug!(backend = self.backend.name(), deleted, "purged expired cache entries");
                deleted
            }
            Err(e) => {
                tracing::warn!(backend = self.backend.name(), error = %e, "cache purge failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::cache::{ManualClock, MemoryBackend};

    struct FailingBackend;

    #[async_trait::async_trait]
    impl CacheBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn state(&self) -> ConnectionState {
            ConnectionState::Disconnected
        }

        async fn load(&self, _key: &str) -> Result<Option<CacheEntry>, Error> {
            Err(Error::Unavailable("down".into()))
        }

        async fn store(&self, _entry: &CacheEntry, _ttl: Duration) -> Result<(), Error> {
            Err(Error::Unavailable("down".into()))
        }

        async fn remove(&self, _key: &str) -> Result<(), Error> {
            Err(Error::Unavailable("down".into()))
        }

        async fn purge_older_than(&self, _cutoff: DateTime<Utc>) -> Result<u64, Error> {
            Err(Error::Unavailable("down".into()))
        }
    }

    fn cache_with_clock(ttl_secs: u64) -> (Cache, Arc<ManualClock>, Arc<MemoryBackend>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let backend = Arc::new(MemoryBackend::new());
        let cache = Cache::new(backend.clone(), Duration::from_secs(ttl_secs)).with_clock(clock.clone());
        (cache, clock, backend)
    }

    #[tokio::test]
    async fn test_get_returns_fresh_entry() {
        let (cache, _clock, _backend) = cache_with_clock(60);
        let entry = CacheEntry::new("http://example.test/page", "<p>B</p>", 200, cache.now());

        assert!(cache.set(entry.clone()).await);
        assert_eq!(cache.get("http://example.test/page").await, Some(entry));
    }

    #[tokio::test]
    async fn test_entry_absent_at_ttl_boundary() {
        let (cache, clock, backend) = cache_with_clock(60);
        cache.set(CacheEntry::new("k", "body", 200, cache.now())).await;

        clock.advance(TimeDelta::seconds(59));
        assert!(cache.get("k").await.is_some());

        clock.advance(TimeDelta::seconds(1));
        assert!(cache.get("k").await.is_none());
        assert!(backend.is_empty().await, "expired entry is dropped on read");
    }

    #[tokio::test]
    async fn test_backend_failure_degrades_to_miss() {
        let cache = Cache::new(Arc::new(FailingBackend), Duration::from_secs(60));

        assert!(!cache.set(CacheEntry::new("k", "body", 200, cache.now())).await);
        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.purge_expired().await, 0);
        assert_eq!(cache.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_fresh_entries() {
        let (cache, clock, backend) = cache_with_clock(60);
        cache.set(CacheEntry::new("old", "body", 200, cache.now())).await;
        clock.advance(TimeDelta::seconds(30));
        cache.set(CacheEntry::new("new", "body", 200, cache.now())).await;
        clock.advance(TimeDelta::seconds(30));

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(backend.len().await, 1);
        assert!(cache.get("new").await.is_some());
    }
}
