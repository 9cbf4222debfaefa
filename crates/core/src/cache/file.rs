//! File-per-key cache backend.
//!
//! Layout: `<cache-dir>/<sanitized-key>.json` holding
//! `{ "timestamp": <unix-seconds>, "content": "...", "status": 200, "key": "..." }`.
//! The directory is created on first write.

use super::hash::sanitize_key;
use super::{CacheBackend, CacheEntry};
use crate::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// On-disk record format.
#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    /// Write time in unix seconds.
    timestamp: i64,
    content: String,
    #[serde(default = "default_status")]
    status: u16,
    /// Original key, used to detect sanitized-name collisions.
    #[serde(default)]
    key: Option<String>,
}

fn default_status() -> u16 {
    200
}

impl FileRecord {
    fn into_entry(self, key: &str) -> Result<CacheEntry, Error> {
        let created_at = DateTime::from_timestamp(self.timestamp, 0)
            .ok_or_else(|| Error::InvalidInput(format!("timestamp out of range: {}", self.timestamp)))?;
        Ok(CacheEntry::new(key, self.content, self.status, created_at))
    }
}

/// Cache backend storing one JSON file per key.
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
    ready: OnceCell<()>,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), ready: OnceCell::new() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }

    async fn ensure_dir(&self) -> Result<(), Error> {
        self.ready
            .get_or_try_init(|| async { tokio::fs::create_dir_all(&self.dir).await })
            .await?;
        Ok(())
    }

    async fn read_record(path: &Path) -> Result<Option<FileRecord>, Error> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }
}

#[async_trait::async_trait]
impl CacheBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, Error> {
        let Some(record) = Self::read_record(&self.path_for(key)).await? else {
            return Ok(None);
        };

        if record.key.as_deref().is_some_and(|stored| stored != key) {
            tracing::debug!(key, "cache file belongs to a different key");
            return Ok(None);
        }

        record.into_entry(key).map(Some)
    }

    async fn store(&self, entry: &CacheEntry, _ttl: Duration) -> Result<(), Error> {
        self.ensure_dir().await?;

        let record = FileRecord {
            timestamp: entry.created_at.timestamp(),
            content: entry.content.clone(),
            status: entry.status_code,
            key: Some(entry.key.clone()),
        };
        let json = serde_json::to_string(&record)?;

        let path = self.path_for(&entry.key);
        let tmp = self.dir.join(format!(
            ".{}.{}.{}.tmp",
            sanitize_key(&entry.key),
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            tokio::fs::remove_file(&tmp).await.ok();
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut deleted = 0u64;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let record = match Self::read_record(&path).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping unreadable cache file");
                    continue;
                }
            };

            if record.timestamp <= cutoff.timestamp() {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => deleted += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn entry(key: &str, created_at: DateTime<Utc>) -> CacheEntry {
        CacheEntry::new(key, "<html><body>hi</body></html>", 200, created_at)
    }

    #[tokio::test]
    async fn test_directory_created_on_first_write() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("cache");
        let backend = FileBackend::new(&dir);
        assert!(!dir.exists());

        assert!(backend.load("https://example.com/").await.unwrap().is_none());
        assert!(!dir.exists(), "reads do not create the directory");

        backend.store(&entry("https://example.com/", Utc::now()), Duration::from_secs(60)).await.unwrap();
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn test_store_and_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(tmp.path());
        let created = DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap();
        let stored = entry("https://example.com/a?b=1", created);

        backend.store(&stored, Duration::from_secs(60)).await.unwrap();

        let loaded = backend.load("https://example.com/a?b=1").await.unwrap().unwrap();
        assert_eq!(loaded, stored);
    }

    #[tokio::test]
    async fn test_file_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(tmp.path());
        backend.store(&entry("http://example.com/a", Utc::now()), Duration::from_secs(60)).await.unwrap();

        let path = tmp.path().join("http___example_com_a.json");
        assert_eq!(backend.path_for("http://example.com/a"), path);

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw["timestamp"].is_i64());
        assert_eq!(raw["content"], "<html><body>hi</body></html>");
    }

    #[tokio::test]
    async fn test_reads_legacy_record_without_status() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(tmp.path());
        let path = backend.path_for("http://example.com/");
        std::fs::write(&path, r#"{"timestamp": 1700000000, "content": "<p>old</p>"}"#).unwrap();

        let loaded = backend.load("http://example.com/").await.unwrap().unwrap();
        assert_eq!(loaded.status_code, 200);
        assert_eq!(loaded.content, "<p>old</p>");
        assert_eq!(loaded.created_at.timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn test_sanitized_collision_reads_as_miss() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(tmp.path());
        backend.store(&entry("http://a.com/b", Utc::now()), Duration::from_secs(60)).await.unwrap();

        assert_eq!(backend.path_for("http://a.com/b"), backend.path_for("http://a_com_b"));
        assert!(backend.load("http://a_com_b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(tmp.path());
        std::fs::write(backend.path_for("k"), "not json").unwrap();

        assert!(matches!(backend.load("k").await, Err(Error::Serialization(_))));
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(tmp.path());
        assert!(backend.remove("never-written").await.is_ok());
    }

    #[tokio::test]
    async fn test_purge_older_than() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(tmp.path());
        let now = Utc::now();
        let ttl = Duration::from_secs(60);
        backend.store(&entry("old", now - TimeDelta::seconds(600)), ttl).await.unwrap();
        backend.store(&entry("new", now), ttl).await.unwrap();

        let deleted = backend.purge_older_than(now - TimeDelta::seconds(60)).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(backend.load("old").await.unwrap().is_none());
        assert!(backend.load("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(tmp.path().join("absent"));
        assert_eq!(backend.purge_older_than(Utc::now()).await.unwrap(), 0);
    }
}
