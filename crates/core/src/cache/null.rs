//! Backend used when caching is disabled.

use super::{CacheBackend, CacheEntry};
use crate::Error;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Cache backend that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

#[async_trait::async_trait]
impl CacheBackend for NullBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn load(&self, _key: &str) -> Result<Option<CacheEntry>, Error> {
        Ok(None)
    }

    async fn store(&self, _entry: &CacheEntry, _ttl: Duration) -> Result<(), Error> {
        Ok(())
    }

    async fn remove(&self, _key: &str) -> Result<(), Error> {
        Ok(())
    }

    async fn purge_older_than(&self, _cutoff: DateTime<Utc>) -> Result<u64, Error> {
        Ok(0)
    }
}
