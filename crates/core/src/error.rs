//! Unified error types for the cache layer.
//!
//! Nothing in here is ever surfaced to an HTTP client: the [`Cache`](crate::Cache)
//! wrapper logs these and degrades to "no cache" behavior.

use tokio_rusqlite::rusqlite;

/// Unified error types for rendition cache backends.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., an empty cache key).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Filesystem operation failed.
    #[error("CACHE_ERROR: io: {0}")]
    Io(#[from] std::io::Error),

    /// Stored entry could not be encoded or decoded.
    #[error("CACHE_ERROR: serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote key/value command failed.
    #[error("CACHE_ERROR: redis: {0}")]
    Redis(#[from] redis::RedisError),

    /// Backend has no usable connection right now.
    #[error("CACHE_UNAVAILABLE: {0}")]
    Unavailable(String),
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl Error {
    /// Whether the failure means the backend itself is unreachable, as opposed
    /// to a single bad record.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            Error::Unavailable(_) => true,
            Error::Redis(e) => e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal(),
            Error::Database(tokio_rusqlite::Error::ConnectionClosed) => true,
            _ => false,
        }
    }
}
