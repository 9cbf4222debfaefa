//! Enumerated configuration values shared by the cache, normalizer and renderer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which cache store backs the render cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// No caching: every request renders.
    None,
    #[default]
    Memory,
    File,
    Sqlite,
    Redis,
}

impl fmt::Display for CacheBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheBackendKind::None => "none",
            CacheBackendKind::Memory => "memory",
            CacheBackendKind::File => "file",
            CacheBackendKind::Sqlite => "sqlite",
            CacheBackendKind::Redis => "redis",
        };
        f.write_str(name)
    }
}

/// How the URL normalizer treats query strings.
///
/// `Preserve` keeps the query (minus volatile parameters), so every distinct
/// query is its own cache entry. `Collapse` replaces any query with a fixed
/// marker, so all query variants of a path share one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryPolicy {
    #[default]
    Preserve,
    Collapse,
}

/// Resource types a page may request while rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    Xhr,
    Fetch,
    WebSocket,
    Other,
}

impl ResourceKind {
    /// Resource types aborted by default.
    pub const DEFAULT_BLOCKED: [ResourceKind; 3] = [ResourceKind::Image, ResourceKind::Stylesheet, ResourceKind::Font];
}
