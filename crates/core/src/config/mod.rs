//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (RENDITION_*)
//! 2. TOML config file (if RENDITION_CONFIG_FILE set)
//! 3. Built-in defaults
//!
//! List values are given in figment's array syntax when set through the
//! environment, e.g. `RENDITION_BLOCKED_RESOURCES='[image, font]'`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod kinds;
mod validation;

pub use kinds::{CacheBackendKind, QueryPolicy, ResourceKind};
pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (RENDITION_*)
/// 2. TOML config file (if RENDITION_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Interface the HTTP listener binds to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the HTTP listener binds to.
    #[serde(default = "default_port")]
    pub port: u16,

    /// PEM certificate chain. TLS is enabled when this and `tls_key` are set.
    #[serde(default)]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key matching `tls_cert`.
    #[serde(default)]
    pub tls_key: Option<PathBuf>,

    /// Cache store backend.
    ///
    /// Set via RENDITION_CACHE_BACKEND (none | memory | file | sqlite | redis).
    #[serde(default)]
    pub cache_backend: CacheBackendKind,

    /// Seconds a cached render stays valid.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Directory for the file backend. Created on first write.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Path to the SQLite cache database.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Connection URL for the Redis backend.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix prepended to every Redis key.
    #[serde(default = "default_redis_prefix")]
    pub redis_prefix: String,

    /// Use a SHA-256 digest of the normalized URL as the cache key.
    #[serde(default)]
    pub hash_keys: bool,

    /// Namespace mixed into hashed keys.
    #[serde(default = "default_cache_namespace")]
    pub cache_namespace: String,

    /// Render statuses that are written to the cache.
    #[serde(default = "default_cacheable_statuses")]
    pub cacheable_statuses: Vec<u16>,

    /// Query string handling for cache keys.
    #[serde(default)]
    pub query_policy: QueryPolicy,

    /// Query that replaces every query string under `QueryPolicy::Collapse`.
    #[serde(default = "default_query_marker")]
    pub query_marker: String,

    /// Query parameters dropped under `QueryPolicy::Preserve`.
    #[serde(default = "default_volatile_params")]
    pub volatile_params: Vec<String>,

    /// Deadline for one render, redirects included, in milliseconds.
    #[serde(default = "default_render_timeout_ms")]
    pub render_timeout_ms: u64,

    /// Longest redirect chain the renderer follows.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Resource types aborted before they reach the network.
    #[serde(default = "default_blocked_resources")]
    pub blocked_resources: Vec<ResourceKind>,

    /// Quiet period with no network activity that marks a page as done.
    #[serde(default = "default_network_idle_ms")]
    pub network_idle_ms: u64,

    /// How often the renderer checks whether the page is done.
    #[serde(default = "default_page_done_check_interval_ms")]
    pub page_done_check_interval_ms: u64,

    /// Remove `<script>` elements (JSON-LD excepted) from rendered HTML.
    #[serde(default = "default_true")]
    pub strip_scripts: bool,

    /// Let `<meta name="prerender-status-code">` override the captured status.
    #[serde(default = "default_true")]
    pub honor_status_meta: bool,

    /// Maximum number of browser tabs rendering at once.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// How long a render waits for a free tab before giving up.
    #[serde(default = "default_pool_checkout_timeout_ms")]
    pub pool_checkout_timeout_ms: u64,

    /// Chrome/Chromium binary. Auto-detected when unset.
    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,

    /// Extra command-line flags for the browser process.
    #[serde(default = "default_chrome_flags")]
    pub chrome_flags: Vec<String>,

    /// Run the browser without a window.
    #[serde(default = "default_true")]
    pub headless: bool,

    /// User-Agent override applied to every tab.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Seconds between expired-entry sweeps. 0 disables sweeping.
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    3000
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./rendition-cache.sqlite")
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".into()
}

fn default_redis_prefix() -> String {
    "rendition:".into()
}

fn default_cache_namespace() -> String {
    "sites".into()
}

fn default_cacheable_statuses() -> Vec<u16> {
    vec![200]
}

fn default_query_marker() -> String {
    "cached=true".into()
}

fn default_volatile_params() -> Vec<String> {
    vec!["_escaped_fragment_".into()]
}

fn default_render_timeout_ms() -> u64 {
    10_000
}

fn default_max_redirects() -> usize {
    5
}

fn default_blocked_resources() -> Vec<ResourceKind> {
    ResourceKind::DEFAULT_BLOCKED.to_vec()
}

fn default_network_idle_ms() -> u64 {
    500
}

fn default_page_done_check_interval_ms() -> u64 {
    100
}

fn default_pool_size() -> usize {
    4
}

fn default_pool_checkout_timeout_ms() -> u64 {
    5_000
}

fn default_chrome_flags() -> Vec<String> {
    ["--no-sandbox", "--disable-setuid-sandbox", "--disable-gpu", "--hide-scrollbars"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_purge_interval_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls_cert: None,
            tls_key: None,
            cache_backend: CacheBackendKind::default(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_dir: default_cache_dir(),
            db_path: default_db_path(),
            redis_url: default_redis_url(),
            redis_prefix: default_redis_prefix(),
            hash_keys: false,
            cache_namespace: default_cache_namespace(),
            cacheable_statuses: default_cacheable_statuses(),
            query_policy: QueryPolicy::default(),
            query_marker: default_query_marker(),
            volatile_params: default_volatile_params(),
            render_timeout_ms: default_render_timeout_ms(),
            max_redirects: default_max_redirects(),
            blocked_resources: default_blocked_resources(),
            network_idle_ms: default_network_idle_ms(),
            page_done_check_interval_ms: default_page_done_check_interval_ms(),
            strip_scripts: true,
            honor_status_meta: true,
            pool_size: default_pool_size(),
            pool_checkout_timeout_ms: default_pool_checkout_timeout_ms(),
            chrome_executable: None,
            chrome_flags: default_chrome_flags(),
            headless: true,
            user_agent: None,
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

impl AppConfig {
    /// Cache TTL as a Duration.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Render deadline as a Duration.
    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    /// Session pool checkout deadline as a Duration.
    pub fn pool_checkout_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_checkout_timeout_ms)
    }

    /// Sweep interval, or `None` when sweeping is disabled.
    pub fn purge_interval(&self) -> Option<Duration> {
        (self.purge_interval_secs > 0).then(|| Duration::from_secs(self.purge_interval_secs))
    }

    /// Socket address for the HTTP listener.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `host` is not an IP address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid { field: "host".into(), reason: e.to_string() })
    }

    /// Certificate and key paths when TLS is configured.
    pub fn tls_paths(&self) -> Option<(&PathBuf, &PathBuf)> {
        self.tls_cert.as_ref().zip(self.tls_key.as_ref())
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `RENDITION_`
    /// 2. TOML file from `RENDITION_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("RENDITION_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("RENDITION_")
                .ignore(&["config_file"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Redis URL, required only when the Redis backend is selected.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the URL is empty.
    pub fn require_redis_url(&self) -> Result<&str, ConfigError> {
        if self.redis_url.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "redis_url".into(),
                hint: "Set RENDITION_REDIS_URL environment variable".into(),
            });
        }
        Ok(&self.redis_url)
    }
}
