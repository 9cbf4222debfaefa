//! Remote key/value cache backend on Redis.
//!
//! Entries are stored as JSON under `<prefix><key>` with a native expiry equal
//! to the cache TTL. The backend tracks its own [`ConnectionState`]; while
//! disconnected, reconnect attempts are spaced by [`RECONNECT_BACKOFF`] and
//! requests in between fail fast (and read as cache misses upstream).

use super::{CacheBackend, CacheEntry, ConnectionState};
use crate::Error;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Minimum spacing between reconnect attempts.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Upper bound on establishing a connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

fn encode_state(state: ConnectionState) -> u8 {
    match state {
        ConnectionState::Connecting => 0,
        ConnectionState::Connected => 1,
        ConnectionState::Disconnected => 2,
    }
}

fn decode_state(raw: u8) -> ConnectionState {
    match raw {
        0 => ConnectionState::Connecting,
        1 => ConnectionState::Connected,
        _ => ConnectionState::Disconnected,
    }
}

/// Redis-backed cache.
pub struct RedisBackend {
    client: redis::Client,
    prefix: String,
    manager: Mutex<Option<ConnectionManager>>,
    state: AtomicU8,
    last_attempt: StdMutex<Option<Instant>>,
}

impl RedisBackend {
    /// Create a backend for `url`. No connection is made yet.
    ///
    /// # Errors
    ///
    /// Returns `Error::Redis` if the URL is malformed.
    pub fn new(url: &str, prefix: impl Into<String>) -> Result<Self, Error> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            prefix: prefix.into(),
            manager: Mutex::new(None),
            state: AtomicU8::new(encode_state(ConnectionState::Disconnected)),
            last_attempt: StdMutex::new(None),
        })
    }

    /// Create a backend and try to connect once.
    ///
    /// A failed first connection is logged, not returned: the server starts
    /// without a cache and reconnects later.
    pub async fn open(url: &str, prefix: impl Into<String>) -> Result<Self, Error> {
        let backend = Self::new(url, prefix)?;
        match backend.connection().await {
            Ok(_) => tracing::info!("connected to redis cache"),
            Err(e) => tracing::warn!(error = %e, "redis cache unavailable; serving uncached until it recovers"),
        }
        Ok(backend)
    }

    /// Full Redis key for a cache key.
    pub fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = decode_state(self.state.swap(encode_state(state), Ordering::SeqCst));
        if previous != state {
            tracing::info!(from = %previous, to = %state, "redis connection state changed");
        }
    }

    fn backoff_elapsed(&self) -> bool {
        let mut last = self.last_attempt.lock().unwrap_or_else(|e| e.into_inner());
        match *last {
            Some(at) if at.elapsed() < RECONNECT_BACKOFF => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }

    async fn connection(&self) -> Result<ConnectionManager, Error> {
        let mut slot = self.manager.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        if !self.backoff_elapsed() {
            return Err(Error::Unavailable("redis reconnect backoff in effect".into()));
        }

        self.set_state(ConnectionState::Connecting);
        let connected = tokio::time::timeout(CONNECT_TIMEOUT, self.client.get_connection_manager()).await;
        match connected {
            Ok(Ok(conn)) => {
                self.set_state(ConnectionState::Connected);
                *slot = Some(conn.clone());
                Ok(conn)
            }
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e.into())
            }
            Err(_) => {
                self.set_state(ConnectionState::Disconnected);
                Err(Error::Unavailable(format!("redis connect timed out after {}ms", CONNECT_TIMEOUT.as_millis())))
            }
        }
    }

    /// Record the outcome of a command against the connection state.
    fn observe<T>(&self, result: Result<T, Error>) -> Result<T, Error> {
        match &result {
            Ok(_) => self.set_state(ConnectionState::Connected),
            Err(e) if e.is_connection_failure() => self.set_state(ConnectionState::Disconnected),
            Err(_) => {}
        }
        result
    }
}

#[async_trait::async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn state(&self) -> ConnectionState {
        decode_state(self.state.load(Ordering::SeqCst))
    }

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, Error> {
        let mut conn = self.connection().await?;
        let raw = conn
            .get::<_, Option<String>>(self.redis_key(key))
            .await
            .map_err(Error::from);
        match self.observe(raw)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn store(&self, entry: &CacheEntry, ttl: Duration) -> Result<(), Error> {
        let json = serde_json::to_string(entry)?;
        let mut conn = self.connection().await?;
        let written = conn
            .set_ex::<_, _, ()>(self.redis_key(&entry.key), json, ttl.as_secs().max(1))
            .await
            .map_err(Error::from);
        self.observe(written)
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        let mut conn = self.connection().await?;
        let deleted = conn.del::<_, ()>(self.redis_key(key)).await.map_err(Error::from);
        self.observe(deleted)
    }

    async fn purge_older_than(&self, _cutoff: DateTime<Utc>) -> Result<u64, Error> {
        // Keys carry a native expiry; Redis reclaims them itself.
        Ok(0)
    }
}
