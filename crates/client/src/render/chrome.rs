//! Chrome/Chromium sessions over the DevTools protocol (chromiumoxide).
//!
//! Each [`ChromeSession`] is one tab. While it navigates, a listener on
//! `Fetch.requestPaused` aborts blocked resource types and watches the
//! main-frame document response, turning 3xx answers into
//! [`Navigation::Redirect`] so the engine can bound the chain. A second set of
//! listeners counts in-flight requests for the network-idle check.

use super::{
    BlockPolicy, Browser, Navigation, RenderError, RenderOptions, Session, classify_navigation_error, is_redirect,
};
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, FailRequestParams, RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ErrorReason, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, Headers, ResourceType,
    SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::FrameId;
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use rendition_core::AppConfig;
use rendition_core::config::ResourceKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use url::Url;

/// Header sent with every request so origins can recognize render traffic.
pub const PRERENDER_HEADER: &str = "X-Prerender";

/// Browser launch settings.
#[derive(Debug, Clone)]
pub struct ChromeSettings {
    pub executable: Option<PathBuf>,
    pub flags: Vec<String>,
    pub headless: bool,
    pub user_agent: Option<String>,
}

impl ChromeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            executable: config.chrome_executable.clone(),
            flags: config.chrome_flags.clone(),
            headless: config.headless,
            user_agent: config.user_agent.clone(),
        }
    }
}

/// Map a CDP resource type onto the configurable kinds.
pub fn resource_kind(resource_type: &ResourceType) -> ResourceKind {
    match resource_type {
        ResourceType::Document => ResourceKind::Document,
        ResourceType::Stylesheet => ResourceKind::Stylesheet,
        ResourceType::Image => ResourceKind::Image,
        ResourceType::Media => ResourceKind::Media,
        ResourceType::Font => ResourceKind::Font,
        ResourceType::Script => ResourceKind::Script,
        ResourceType::Xhr => ResourceKind::Xhr,
        ResourceType::Fetch => ResourceKind::Fetch,
        ResourceType::WebSocket => ResourceKind::WebSocket,
        _ => ResourceKind::Other,
    }
}

/// A launched browser process with its CDP event loop.
pub struct ChromeBrowser {
    browser: CdpBrowser,
    user_agent: Option<String>,
    handler: JoinHandle<()>,
}

impl ChromeBrowser {
    /// Launch a browser instance.
    ///
    /// The browser uses a background task to drive Chrome DevTools Protocol
    /// events; it lives as long as this value.
    pub async fn launch(settings: ChromeSettings) -> Result<Self, RenderError> {
        let mut builder = BrowserConfig::builder();
        if !settings.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &settings.executable {
            builder = builder.chrome_executable(path);
        }
        for flag in &settings.flags {
            builder = builder.arg(flag.as_str());
        }

        let config = builder.build().map_err(RenderError::BrowserLaunch)?;
        let (browser, mut handler) =
            CdpBrowser::launch(config).await.map_err(|e| RenderError::BrowserLaunch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("browser handler event error: {e}");
                }
            }
            tracing::debug!("browser handler stopped");
        });

        tracing::info!(headless = settings.headless, "browser launched");
        Ok(Self { browser, user_agent: settings.user_agent, handler })
    }
}

impl Drop for ChromeBrowser {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait::async_trait]
impl Browser for ChromeBrowser {
    type Session = ChromeSession;

    async fn open(&self) -> Result<ChromeSession, RenderError> {
        let page = self.browser.new_page("about:blank").await.map_err(|e| {
            if self.handler.is_finished() {
                RenderError::BrowserClosed
            } else {
                RenderError::BrowserLaunch(e.to_string())
            }
        })?;

        let mut session = ChromeSession::new(page);
        if let Err(e) = session.prepare(self.user_agent.as_deref()).await {
            session.release();
            return Err(e);
        }
        Ok(session)
    }
}

/// In-flight request counter for the network-idle check.
#[derive(Debug)]
struct NetworkActivity {
    inflight: AtomicI64,
    last_change: Mutex<Instant>,
}

impl NetworkActivity {
    fn new() -> Self {
        Self { inflight: AtomicI64::new(0), last_change: Mutex::new(Instant::now()) }
    }

    fn touch(&self) {
        if let Ok(mut last) = self.last_change.lock() {
            *last = Instant::now();
        }
    }

    fn started(&self) {
        self.inflight.fetch_add(1, Ordering::SeqCst);
        self.touch();
    }

    fn settled(&self) {
        // Requests that began before the counter was reset may settle after it.
        let _ = self.inflight.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some((n - 1).max(0)));
        self.touch();
    }

    fn reset(&self) {
        self.inflight.store(0, Ordering::SeqCst);
        self.touch();
    }

    fn is_idle(&self, window: Duration) -> bool {
        self.inflight.load(Ordering::SeqCst) == 0
            && self.last_change.lock().map(|last| last.elapsed() >= window).unwrap_or(true)
    }
}

/// Main-frame document outcome observed by the interceptor.
#[derive(Debug, Default)]
struct DocumentResponse {
    status: Option<u16>,
    redirect: Option<(u16, String)>,
}

type SharedResponse = Arc<Mutex<DocumentResponse>>;

/// One browser tab.
pub struct ChromeSession {
    page: Option<Page>,
    activity: Arc<NetworkActivity>,
    response: SharedResponse,
    interceptor: Option<(BlockPolicy, JoinHandle<()>)>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChromeSession {
    fn new(page: Page) -> Self {
        Self {
            page: Some(page),
            activity: Arc::new(NetworkActivity::new()),
            response: Arc::default(),
            interceptor: None,
            tasks: Vec::new(),
        }
    }

    fn page(&self) -> Result<Page, RenderError> {
        self.page.clone().ok_or(RenderError::BrowserClosed)
    }

    /// Headers, user agent and network counters.
    async fn prepare(&mut self, user_agent: Option<&str>) -> Result<(), RenderError> {
        let page = self.page()?;
        let setup = |e: chromiumoxide::error::CdpError| RenderError::BrowserLaunch(e.to_string());

        page.execute(SetExtraHttpHeadersParams::new(Headers::new(serde_json::json!({ PRERENDER_HEADER: "1" }))))
            .await
            .map_err(setup)?;

        if let Some(agent) = user_agent {
            page.execute(SetUserAgentOverrideParams::new(agent)).await.map_err(setup)?;
        }

        let mut sent = page.event_listener::<EventRequestWillBeSent>().await.map_err(setup)?;
        let mut finished = page.event_listener::<EventLoadingFinished>().await.map_err(setup)?;
        let mut failed = page.event_listener::<EventLoadingFailed>().await.map_err(setup)?;

        let activity = Arc::clone(&self.activity);
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = sent.next().await {
                // A redirect hop reuses the request id of the request it replaces.
                if event.redirect_response.is_none() {
                    activity.started();
                }
            }
        }));
        let activity = Arc::clone(&self.activity);
        self.tasks.push(tokio::spawn(async move {
            while finished.next().await.is_some() {
                activity.settled();
            }
        }));
        let activity = Arc::clone(&self.activity);
        self.tasks.push(tokio::spawn(async move {
            while failed.next().await.is_some() {
                activity.settled();
            }
        }));

        Ok(())
    }

    /// Start (or restart, if the block policy changed) request interception.
    async fn intercept(&mut self, page: &Page, block: &BlockPolicy) -> Result<(), RenderError> {
        if let Some((current, task)) = &self.interceptor {
            if current == block && !task.is_finished() {
                return Ok(());
            }
        }
        if let Some((_, task)) = self.interceptor.take() {
            task.abort();
        }

        let setup = |e: chromiumoxide::error::CdpError| RenderError::Navigation(e.to_string());
        let main_frame = page.mainframe().await.map_err(setup)?;
        let events = page.event_listener::<EventRequestPaused>().await.map_err(setup)?;

        let task = tokio::spawn(handle_paused_requests(
            page.clone(),
            events,
            block.clone(),
            main_frame,
            Arc::clone(&self.response),
        ));

        let patterns = vec![
            RequestPattern::builder().url_pattern("*").request_stage(RequestStage::Request).build(),
            RequestPattern::builder()
                .url_pattern("*")
                .resource_type(ResourceType::Document)
                .request_stage(RequestStage::Response)
                .build(),
        ];
        if let Err(e) = page.execute(EnableParams::builder().patterns(patterns).build()).await {
            task.abort();
            return Err(setup(e));
        }

        self.interceptor = Some((block.clone(), task));
        Ok(())
    }

    async fn wait_for_network_idle(&self, opts: &RenderOptions) {
        let window = opts.network_idle();
        let mut ticker = tokio::time::interval(opts.check_interval());
        loop {
            ticker.tick().await;
            if self.activity.is_idle(window) {
                return;
            }
        }
    }
}

async fn resume(page: &Page, event: &EventRequestPaused) {
    if let Err(e) = page.execute(ContinueRequestParams::new(event.request_id.clone())).await {
        tracing::trace!(url = %event.request.url, error = %e, "continue request failed");
    }
}

async fn abort(page: &Page, event: &EventRequestPaused, reason: ErrorReason) {
    if let Err(e) = page.execute(FailRequestParams::new(event.request_id.clone(), reason)).await {
        tracing::trace!(url = %event.request.url, error = %e, "fail request failed");
    }
}

fn response_header<'a>(event: &'a EventRequestPaused, name: &str) -> Option<&'a str> {
    event
        .response_headers
        .as_ref()?
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .map(|header| header.value.as_str())
}

/// What to do with one paused request.
#[derive(Debug)]
enum PausedAction {
    Continue,
    Fail(ErrorReason),
    /// Main-document response that will be delivered; record its status.
    Document(u16),
    /// Main-document 3xx with a target; record it and stop the load.
    Redirect(u16, String),
}

/// Request-stage pauses carry no response status; response-stage pauses do.
fn decide(
    kind: ResourceKind, response_status: Option<i64>, is_main_document: bool, location: Option<&str>,
    block: &BlockPolicy,
) -> PausedAction {
    let Some(code) = response_status else {
        return if block.allows(kind) { PausedAction::Continue } else { PausedAction::Fail(ErrorReason::BlockedByClient) };
    };
    if !is_main_document {
        return PausedAction::Continue;
    }

    let status = u16::try_from(code).unwrap_or(0);
    match location {
        Some(location) if is_redirect(status) => PausedAction::Redirect(status, location.to_string()),
        _ => PausedAction::Document(status),
    }
}

async fn handle_paused_requests(
    page: Page, mut events: chromiumoxide::listeners::EventStream<EventRequestPaused>, block: BlockPolicy,
    main_frame: Option<FrameId>, response: SharedResponse,
) {
    while let Some(event) = events.next().await {
        let kind = resource_kind(&event.resource_type);
        let is_main_document =
            kind == ResourceKind::Document && main_frame.as_ref().is_none_or(|frame| *frame == event.frame_id);
        let location = response_header(&event, "location");

        match decide(kind, event.response_status_code, is_main_document, location, &block) {
            PausedAction::Continue => resume(&page, &event).await,
            PausedAction::Fail(reason) => {
                tracing::trace!(url = %event.request.url, ?kind, "blocked request");
                abort(&page, &event, reason).await;
            }
            PausedAction::Document(status) => {
                if let Ok(mut doc) = response.lock() {
                    doc.status = Some(status);
                }
                resume(&page, &event).await;
            }
            PausedAction::Redirect(status, location) => {
                if let Ok(mut doc) = response.lock() {
                    doc.redirect = Some((status, location));
                }
                abort(&page, &event, ErrorReason::Aborted).await;
            }
        }
    }
}

/// Status of the loaded document. A load whose main response was never seen
/// has no trustworthy status and must not be cached as a success.
fn document_status(observed: Option<u16>, url: &Url) -> Result<u16, RenderError> {
    observed.ok_or_else(|| {
        tracing::warn!(url = %url, "no main document response observed");
        RenderError::ContentRetrieval(format!("no document response observed for {url}"))
    })
}

#[async_trait::async_trait]
impl Session for ChromeSession {
    async fn navigate(&mut self, url: &Url, opts: &RenderOptions) -> Result<Navigation, RenderError> {
        let page = self.page()?;
        self.intercept(&page, &opts.block).await?;

        if let Ok(mut doc) = self.response.lock() {
            *doc = DocumentResponse::default();
        }
        self.activity.reset();

        let visited = page.goto(url.as_str()).await.map(|_| ());

        let (status, redirect) = match self.response.lock() {
            Ok(mut doc) => (doc.status, doc.redirect.take()),
            Err(_) => (None, None),
        };
        if let Some((status, location)) = redirect {
            return Ok(Navigation::Redirect { status, location });
        }
        if let Err(e) = visited {
            return Err(classify_navigation_error(&e.to_string()));
        }

        self.wait_for_network_idle(opts).await;

        let html = page.content().await.map_err(|e| RenderError::ContentRetrieval(e.to_string()))?;
        let final_url = page
            .url()
            .await
            .map_err(|e| RenderError::ContentRetrieval(e.to_string()))?
            .and_then(|raw| Url::parse(&raw).ok())
            .unwrap_or_else(|| url.clone());

        Ok(Navigation::Document { status: document_status(status, url)?, html, final_url })
    }

    fn release(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some((_, task)) = self.interceptor.take() {
            task.abort();
        }

        let Some(page) = self.page.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = page.close().await {
                        tracing::debug!(error = %e, "failed to close tab");
                    }
                });
            }
            Err(_) => tracing::debug!("no runtime to close tab; dropping it"),
        }
    }
}
