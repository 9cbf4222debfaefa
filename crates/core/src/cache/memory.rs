//! Process-local cache backend.

use super::{CacheBackend, CacheEntry};
use crate::Error;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// In-memory cache backend.
///
/// Uses a HashMap with tokio RwLock for concurrent access. Entries live until
/// they are overwritten, read after expiry, or purged.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, fresh or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, Error> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn store(&self, entry: &CacheEntry, _ttl: Duration) -> Result<(), Error> {
        self.entries.write().await.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at > cutoff);
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[tokio::test]
    async fn test_store_and_load() {
        let backend = MemoryBackend::new();
        let entry = CacheEntry::new("https://example.com/", "<html></html>", 200, Utc::now());

        backend.store(&entry, Duration::from_secs(60)).await.unwrap();

        assert_eq!(backend.load("https://example.com/").await.unwrap(), Some(entry));
        assert!(backend.load("https://other.com/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let backend = MemoryBackend::new();
        backend
            .store(&CacheEntry::new("k", "v", 200, Utc::now()), Duration::from_secs(60))
            .await
            .unwrap();

        backend.remove("k").await.unwrap();
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let backend = MemoryBackend::new();
        let mut handles = Vec::new();
        for i in 0..16 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                let entry = CacheEntry::new(format!("k{i}"), "v", 200, Utc::now());
                backend.store(&entry, Duration::from_secs(60)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(backend.len().await, 16);
    }

    #[tokio::test]
    async fn test_purge_older_than() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        let ttl = Duration::from_secs(60);
        backend.store(&CacheEntry::new("old", "v", 200, now - TimeDelta::seconds(120)), ttl).await.unwrap();
        backend.store(&CacheEntry::new("new", "v", 200, now), ttl).await.unwrap();

        let deleted = backend.purge_older_than(now - TimeDelta::seconds(60)).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(backend.load("new").await.unwrap().is_some());
    }
}
