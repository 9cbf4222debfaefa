//! Cache entry CRUD operations on the SQLite backend.

use super::connection::CacheDb;
use super::{CacheBackend, CacheEntry};
use crate::Error;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use std::time::Duration;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// Fixed-width RFC 3339 so timestamps compare correctly as text.
fn to_sql_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_sql_time(raw: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("bad timestamp {raw:?}: {e}")))
}

impl CacheDb {
    /// Insert or update a cache entry.
    ///
    /// Uses UPSERT semantics: inserts if the key doesn't exist,
    /// updates all fields if it does.
    pub async fn upsert_entry(&self, entry: &CacheEntry, ttl: Duration) -> Result<(), Error> {
        let entry = entry.clone();
        let expires_at = entry
            .created_at
            .checked_add_signed(TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO entries (key, content, status_code, created_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(key) DO UPDATE SET
                        content = excluded.content,
                        status_code = excluded.status_code,
                        created_at = excluded.created_at,
                        expires_at = excluded.expires_at",
                    params![
                        &entry.key,
                        &entry.content,
                        entry.status_code as i64,
                        to_sql_time(entry.created_at),
                        to_sql_time(expires_at),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Get an entry by key.
    ///
    /// Returns None if the key doesn't exist in the cache.
    pub async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<CacheEntry>, Error> {
                let mut stmt =
                    conn.prepare("SELECT key, content, status_code, created_at FROM entries WHERE key = ?1")?;

                let result = stmt.query_row(params![key], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                });

                match result {
                    Ok((key, content, status_code, created_at)) => {
                        let status_code = u16::try_from(status_code)
                            .map_err(|_| Error::InvalidInput(format!("bad status code {status_code}")))?;
                        Ok(Some(CacheEntry::new(key, content, status_code, from_sql_time(&created_at)?)))
                    }
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Delete an entry by key.
    pub async fn delete_entry(&self, key: &str) -> Result<(), Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute("DELETE FROM entries WHERE key = ?1", params![key])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete entries created at or before `cutoff`.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_entries_before(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let cutoff = to_sql_time(cutoff);
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM entries WHERE created_at <= ?1", params![cutoff])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of stored entries, fresh or not.
    pub async fn count_entries(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[async_trait::async_trait]
impl CacheBackend for CacheDb {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, Error> {
        self.get_entry(key).await
    }

    async fn store(&self, entry: &CacheEntry, ttl: Duration) -> Result<(), Error> {
        self.upsert_entry(entry, ttl).await
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        self.delete_entry(key).await
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        self.purge_entries_before(cutoff).await
    }
}
