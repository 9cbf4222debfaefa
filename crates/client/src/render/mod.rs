//! Headless browser rendering.
//!
//! [`Renderer`] is the seam the orchestrator calls. [`RenderEngine`] implements
//! it on top of any [`Browser`]: it checks a [`Session`] out of a bounded
//! pool, follows redirects, enforces the deadline, and post-processes the
//! document. The chromiumoxide-backed browser lives in [`chrome`] behind the
//! `render` feature.

#[cfg(feature = "render")]
pub mod chrome;
pub mod engine;
pub mod pool;
pub mod postprocess;

pub use engine::RenderEngine;
pub use pool::{Checkout, SessionPool};

use rendition_core::AppConfig;
use rendition_core::config::ResourceKind;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors that can occur during page rendering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// Failed to launch or connect to browser.
    #[error("browser launch failed: {0}")]
    BrowserLaunch(String),

    /// Failed to navigate to URL.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// DNS lookup for the target host failed.
    #[error("host could not be resolved: {0}")]
    Unresolvable(String),

    /// Failed to get page content.
    #[error("content retrieval failed: {0}")]
    ContentRetrieval(String),

    /// Deadline elapsed before the page was done.
    #[error("render timeout after {0}ms")]
    Timeout(u64),

    #[error("redirect chain exceeded {0} hops")]
    TooManyRedirects(usize),

    #[error("invalid redirect target: {0}")]
    InvalidRedirect(String),

    /// No session freed up within the checkout deadline.
    #[error("no browser session available after {0}ms")]
    PoolExhausted(u64),

    /// Navigation finished without a document to return.
    #[error("render produced no document")]
    NoDocument,

    /// Browser closed unexpectedly.
    #[error("browser closed unexpectedly")]
    BrowserClosed,
}

/// Map a browser navigation error message to a [`RenderError`].
///
/// DNS failures surface from Chrome as `net::ERR_NAME_NOT_RESOLVED` (or
/// `ERR_NAME_RESOLUTION_FAILED` on some platforms).
pub fn classify_navigation_error(message: &str) -> RenderError {
    if message.contains("ERR_NAME_NOT_RESOLVED") || message.contains("ERR_NAME_RESOLUTION_FAILED") {
        RenderError::Unresolvable(message.to_string())
    } else {
        RenderError::Navigation(message.to_string())
    }
}

/// Statuses that carry a `Location` the engine follows.
pub fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// Resource types aborted while a page loads.
///
/// The top-level document is always allowed, whatever the set holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPolicy {
    blocked: HashSet<ResourceKind>,
}

impl BlockPolicy {
    pub fn new(kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        Self { blocked: kinds.into_iter().filter(|k| *k != ResourceKind::Document).collect() }
    }

    /// Allow everything.
    pub fn none() -> Self {
        Self { blocked: HashSet::new() }
    }

    pub fn allows(&self, kind: ResourceKind) -> bool {
        kind == ResourceKind::Document || !self.blocked.contains(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.blocked.is_empty()
    }
}

impl Default for BlockPolicy {
    fn default() -> Self {
        Self::new(ResourceKind::DEFAULT_BLOCKED)
    }
}

/// Options for rendering a page.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Deadline for the whole render, redirects included (default: 10000).
    pub timeout_ms: u64,

    /// Longest redirect chain followed (default: 5).
    pub max_redirects: usize,

    pub block: BlockPolicy,

    /// Quiet network period that marks the page as done (default: 500).
    pub network_idle_ms: u64,

    /// Poll interval for the done check (default: 100).
    pub check_interval_ms: u64,

    pub strip_scripts: bool,

    pub honor_status_meta: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_redirects: 5,
            block: BlockPolicy::default(),
            network_idle_ms: 500,
            check_interval_ms: 100,
            strip_scripts: true,
            honor_status_meta: true,
        }
    }
}

impl RenderOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            timeout_ms: config.render_timeout_ms,
            max_redirects: config.max_redirects,
            block: BlockPolicy::new(config.blocked_resources.iter().copied()),
            network_idle_ms: config.network_idle_ms,
            check_interval_ms: config.page_done_check_interval_ms,
            strip_scripts: config.strip_scripts,
            honor_status_meta: config.honor_status_meta,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn network_idle(&self) -> Duration {
        Duration::from_millis(self.network_idle_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }
}

/// Result of rendering a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResult {
    /// Serialized DOM after post-processing.
    pub html: String,

    /// HTTP status of the final document.
    pub status: u16,

    /// URL of the final document, after redirects.
    pub final_url: Url,

    /// Redirect hops followed.
    pub redirects: usize,

    /// Time taken to render in milliseconds.
    pub render_time_ms: u64,
}

/// What a single navigation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// The page loaded and settled.
    Document { status: u16, html: String, final_url: Url },

    /// The server answered with a redirect; `location` may be relative.
    Redirect { status: u16, location: String },
}

/// Renderer trait for headless browser page rendering.
#[async_trait::async_trait]
pub trait Renderer: Send + Sync {
    /// Render a URL to HTML via headless browser.
    async fn render(&self, url: &Url, opts: &RenderOptions) -> Result<RenderResult, RenderError>;
}

/// A browser able to open isolated sessions (tabs).
#[async_trait::async_trait]
pub trait Browser: Send + Sync + 'static {
    type Session: Session;

    async fn open(&self) -> Result<Self::Session, RenderError>;
}

/// One browser tab.
#[async_trait::async_trait]
pub trait Session: Send + 'static {
    /// Load `url` without following redirects.
    async fn navigate(&mut self, url: &Url, opts: &RenderOptions) -> Result<Navigation, RenderError>;

    /// Tear the session down. Called exactly once when its pool slot is returned.
    fn release(&mut self);
}
