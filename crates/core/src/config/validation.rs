//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::{AppConfig, CacheBackendKind, QueryPolicy, ResourceKind};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `cache_ttl_secs` is 0
    /// - `render_timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `max_redirects` exceeds 20
    /// - `pool_size` is 0 or exceeds 64
    /// - `cacheable_statuses` is empty or holds a non-HTTP status
    /// - only one of `tls_cert` / `tls_key` is set
    ///
    /// Returns `ConfigError::Missing` if the Redis backend is selected without a URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_ttl_secs == 0 {
            return Err(invalid("cache_ttl_secs", "must be greater than 0"));
        }

        if self.render_timeout_ms < 100 {
            return Err(invalid("render_timeout_ms", "must be at least 100ms"));
        }
        if self.render_timeout_ms > 300_000 {
            return Err(invalid("render_timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.max_redirects > 20 {
            return Err(invalid("max_redirects", "must not exceed 20"));
        }

        if self.pool_size == 0 || self.pool_size > 64 {
            return Err(invalid("pool_size", "must be between 1 and 64"));
        }

        if self.page_done_check_interval_ms == 0 {
            return Err(invalid("page_done_check_interval_ms", "must be greater than 0"));
        }

        if self.cacheable_statuses.is_empty() {
            return Err(invalid("cacheable_statuses", "must list at least one status"));
        }
        if self.cacheable_statuses.iter().any(|s| !(100..=599).contains(s)) {
            return Err(invalid("cacheable_statuses", "must only contain HTTP statuses (100-599)"));
        }

        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(invalid("tls_cert", "tls_cert and tls_key must be set together"));
        }

        if self.cache_backend == CacheBackendKind::Redis {
            self.require_redis_url()?;
        }

        if self.query_policy == QueryPolicy::Collapse && self.query_marker.contains('#') {
            return Err(invalid("query_marker", "must not contain a fragment"));
        }

        if self.blocked_resources.contains(&ResourceKind::Document) {
            tracing::warn!("blocked_resources lists document; top-level documents are never blocked");
        }

        Ok(())
    }
}
