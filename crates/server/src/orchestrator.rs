//! Render orchestration: cache check, render on miss, store, respond.
//!
//! Per request:
//!
//! 1. Normalize the target URL (400 on failure)
//! 2. Look the derived key up in the cache; a fresh hit is returned verbatim
//! 3. On a miss, render through the single-flight gate so concurrent requests
//!    for the same key share one render
//! 4. Store the result when its status is cacheable, then respond
//!
//! Cache failures never fail a request. Render failures become the request's
//! terminal status.

use crate::error::ProxyError;
use crate::flight::{Role, SingleFlight};
use rendition_client::{NormalizedUrl, Normalizer, RenderOptions, Renderer};
use rendition_core::cache::KeyStrategy;
use rendition_core::{AppConfig, Cache, CacheEntry};
use std::collections::HashSet;
use std::sync::Arc;

/// Where a response body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from the cache without rendering.
    Hit,
    /// Rendered by this request.
    Miss,
    /// Rendered by a concurrent request for the same key.
    Shared,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Shared => "SHARED",
        }
    }
}

/// Response for one proxied request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: String,
    pub cache: CacheStatus,
}

/// Status and body of a finished render, shared by coalesced waiters.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Rendered {
    status: u16,
    html: String,
    /// Stored by a flight that landed between this request's miss and its
    /// own flight starting.
    from_cache: bool,
}

/// State the render task needs once it outlives the request that started it.
struct RenderContext {
    cache: Cache,
    renderer: Arc<dyn Renderer>,
    options: RenderOptions,
    cacheable_statuses: HashSet<u16>,
}

impl RenderContext {
    async fn render_and_store(&self, key: String, url: NormalizedUrl) -> Result<Rendered, ProxyError> {
        if let Some(entry) = self.cache.get(&key).await {
            tracing::debug!(url = %url, "entry stored by an earlier flight; skipping render");
            return Ok(Rendered { status: entry.status_code, html: entry.content, from_cache: true });
        }

        let result = self.renderer.render(url.as_url(), &self.options).await.map_err(|e| {
            tracing::warn!(url = %url, error = %e, "render failed");
            ProxyError::from(e)
        })?;

        if result.final_url != *url.as_url() {
            tracing::debug!(url = %url, final_url = %result.final_url, redirects = result.redirects, "render redirected");
        }

        if self.cacheable_statuses.contains(&result.status) {
            self.cache.set(CacheEntry::new(key, result.html.clone(), result.status, self.cache.now())).await;
        } else {
            tracing::debug!(url = %url, status = result.status, "status not cacheable; skipping store");
        }

        Ok(Rendered { status: result.status, html: result.html, from_cache: false })
    }
}

pub struct Orchestrator {
    normalizer: Normalizer,
    keys: KeyStrategy,
    context: Arc<RenderContext>,
    flights: SingleFlight<Result<Rendered, ProxyError>>,
}

impl Orchestrator {
    pub fn new(
        normalizer: Normalizer, keys: KeyStrategy, cache: Cache, renderer: Arc<dyn Renderer>, options: RenderOptions,
        cacheable_statuses: impl IntoIterator<Item = u16>,
    ) -> Self {
        let context = RenderContext {
            cache,
            renderer,
            options,
            cacheable_statuses: cacheable_statuses.into_iter().collect(),
        };
        Self { normalizer, keys, context: Arc::new(context), flights: SingleFlight::new() }
    }

    /// Build from loaded configuration.
    pub fn from_config(config: &AppConfig, cache: Cache, renderer: Arc<dyn Renderer>) -> Self {
        Self::new(
            Normalizer::from_config(config),
            KeyStrategy::from_config(config.hash_keys, &config.cache_namespace),
            cache,
            renderer,
            RenderOptions::from_config(config),
            config.cacheable_statuses.iter().copied(),
        )
    }

    pub fn cache(&self) -> &Cache {
        &self.context.cache
    }

    /// Serve one request for `raw_url`.
    pub async fn handle(&self, raw_url: &str) -> Result<Reply, ProxyError> {
        let url = self.normalizer.normalize(raw_url).map_err(|e| {
            tracing::debug!(raw_url, error = %e, "rejecting target url");
            ProxyError::from(e)
        })?;
        let key = self.keys.key_for(url.as_str());

        if let Some(entry) = self.context.cache.get(&key).await {
            return Ok(Reply { status: entry.status_code, body: entry.content, cache: CacheStatus::Hit });
        }

        let context = Arc::clone(&self.context);
        let owned_key = key.clone();
        let (outcome, role) = self
            .flights
            .run(&key, move || async move { context.render_and_store(owned_key, url).await })
            .await;

        let rendered = outcome.map_err(|e| ProxyError::Internal(e.to_string()))??;
        let cache = match role {
            _ if rendered.from_cache => CacheStatus::Hit,
            Role::Leader => CacheStatus::Miss,
            Role::Follower => CacheStatus::Shared,
        };
        Ok(Reply { status: rendered.status, body: rendered.html, cache })
    }
}
