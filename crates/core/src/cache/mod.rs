//! Render cache: one entry per normalized URL, valid for a fixed TTL.
//!
//! All backends sit behind the [`CacheBackend`] capability and are wrapped by
//! [`Cache`], which applies the same expiry rule to every backend:
//!
//! - Entries are fresh while `now - created_at < ttl`
//! - Expired entries read as absent and are deleted lazily
//! - Backend failures are logged, never returned to the caller
//!
//! Backends:
//!
//! - [`NullBackend`] - caching disabled
//! - [`MemoryBackend`] - process-local map
//! - [`FileBackend`] - one JSON file per key
//! - [`CacheDb`] - SQLite via tokio-rusqlite, WAL mode, versioned migrations
//! - [`RedisBackend`] - remote key/value store

pub mod clock;
pub mod connection;
pub mod entries;
pub mod file;
pub mod hash;
pub mod memory;
pub mod migrations;
pub mod null;
pub mod remote;
pub mod store;

pub use crate::Error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use connection::CacheDb;
pub use file::FileBackend;
pub use hash::KeyStrategy;
pub use memory::MemoryBackend;
pub use null::NullBackend;
pub use remote::RedisBackend;
pub use store::Cache;

use crate::config::{AppConfig, CacheBackendKind};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A cached render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key derived from the normalized URL.
    pub key: String,
    /// Rendered document body.
    pub content: String,
    /// HTTP status observed during the render.
    pub status_code: u16,
    /// Write time.
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, content: impl Into<String>, status_code: u16, created_at: DateTime<Utc>) -> Self {
        Self { key: key.into(), content: content.into(), status_code, created_at }
    }

    /// Whether the entry may still be served at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(self.created_at) < ttl
    }
}

/// Connection state of a cache backend.
///
/// Local backends are always `Connected`; remote backends move between states
/// as connections are established and lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Storage capability shared by all cache backends.
///
/// Implementations must be safe under concurrent calls from many requests.
/// They store and return entries verbatim; expiry is decided by [`Cache`].
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;

    /// Current connection state.
    fn state(&self) -> ConnectionState {
        ConnectionState::Connected
    }

    /// Read the entry stored under `key`, fresh or not.
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, Error>;

    /// Write `entry` under its key. `ttl` lets backends with native expiry
    /// reclaim space on their own.
    async fn store(&self, entry: &CacheEntry, ttl: Duration) -> Result<(), Error>;

    /// Delete the entry stored under `key`, if any.
    async fn remove(&self, key: &str) -> Result<(), Error>;

    /// Delete every entry created at or before `cutoff`.
    ///
    /// Returns the number of deleted entries.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, Error>;
}

/// Build the backend selected by `config.cache_backend`.
///
/// # Errors
///
/// Returns an error if the SQLite database cannot be opened or the Redis URL
/// is malformed. An unreachable Redis server is not an error.
pub async fn open_backend(config: &AppConfig) -> Result<Arc<dyn CacheBackend>, Error> {
    let backend: Arc<dyn CacheBackend> = match config.cache_backend {
        CacheBackendKind::None => Arc::new(NullBackend),
        CacheBackendKind::Memory => Arc::new(MemoryBackend::new()),
        CacheBackendKind::File => Arc::new(FileBackend::new(&config.cache_dir)),
        CacheBackendKind::Sqlite => Arc::new(CacheDb::open(&config.db_path).await?),
        CacheBackendKind::Redis => {
            let url = config.require_redis_url().map_err(|e| Error::InvalidInput(e.to_string()))?;
            Arc::new(RedisBackend::open(url, config.redis_prefix.clone()).await?)
        }
    };
    tracing::info!(backend = backend.name(), ttl_secs = config.cache_ttl_secs, "cache backend ready");
    Ok(backend)
}
