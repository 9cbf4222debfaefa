//! Pool-backed renderer with redirect following and a hard deadline.

use super::pool::SessionPool;
use super::postprocess;
use super::{Browser, Navigation, RenderError, RenderOptions, RenderResult, Renderer, Session};
use std::time::{Duration, Instant};
use url::Url;

/// [`Renderer`] over a bounded pool of browser sessions.
pub struct RenderEngine<B: Browser> {
    pool: SessionPool<B>,
}

impl<B: Browser> RenderEngine<B> {
    pub fn new(browser: B, pool_size: usize, checkout_timeout: Duration) -> Self {
        Self { pool: SessionPool::new(browser, pool_size, checkout_timeout) }
    }

    pub fn pool(&self) -> &SessionPool<B> {
        &self.pool
    }
}

/// The document a redirect chain ended on.
struct Landed {
    status: u16,
    html: String,
    final_url: Url,
    redirects: usize,
}

async fn follow_redirects<S: Session>(session: &mut S, url: &Url, opts: &RenderOptions) -> Result<Landed, RenderError> {
    let mut current = url.clone();
    let mut hops = 0usize;

    loop {
        match session.navigate(&current, opts).await? {
            Navigation::Document { status, html, final_url } => {
                return Ok(Landed { status, html, final_url, redirects: hops });
            }
            Navigation::Redirect { status, location } => {
                if hops >= opts.max_redirects {
                    tracing::debug!(url = %url, max = opts.max_redirects, "redirect limit reached");
                    return Err(RenderError::TooManyRedirects(opts.max_redirects));
                }

                let next = current
                    .join(&location)
                    .map_err(|e| RenderError::InvalidRedirect(format!("{location}: {e}")))?;
                if !matches!(next.scheme(), "http" | "https") {
                    return Err(RenderError::InvalidRedirect(next.to_string()));
                }

                tracing::debug!(from = %current, to = %next, status, "following redirect");
                current = next;
                hops += 1;
            }
        }
    }
}

#[async_trait::async_trait]
impl<B: Browser> Renderer for RenderEngine<B> {
    async fn render(&self, url: &Url, opts: &RenderOptions) -> Result<RenderResult, RenderError> {
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + opts.timeout();

        // Checkout, tab setup and navigation share the one deadline. The
        // session is dropped inside the future, so expiry releases it too.
        let attempt = async {
            let mut session = self.pool.checkout().await?;
            follow_redirects(&mut *session, url, opts).await
        };
        let outcome = tokio::time::timeout_at(deadline, attempt).await;

        let landed = match outcome {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(url = %url, timeout_ms = opts.timeout_ms, "render deadline exceeded");
                return Err(RenderError::Timeout(opts.timeout_ms));
            }
        };

        if landed.html.trim().is_empty() {
            return Err(RenderError::NoDocument);
        }

        let (html, status) = postprocess::apply(landed.html, landed.status, opts);
        Ok(RenderResult {
            html,
            status,
            final_url: landed.final_url,
            redirects: landed.redirects,
            render_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendition_core::config::ResourceKind;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// How the fake site answers a URL.
    #[derive(Clone)]
    enum Route {
        Page { status: u16, html: &'static str, subresources: Vec<ResourceKind> },
        Redirect(&'static str),
        Hang,
        Fail(&'static str),
    }

    #[derive(Default)]
    struct Site {
        routes: HashMap<String, Route>,
        opened: AtomicUsize,
        released: AtomicUsize,
        navigations: AtomicUsize,
        requested: Mutex<Vec<ResourceKind>>,
        aborted: Mutex<Vec<ResourceKind>>,
    }

    impl Site {
        fn with(routes: impl IntoIterator<Item = (&'static str, Route)>) -> Arc<Self> {
            Arc::new(Self { routes: routes.into_iter().map(|(u, r)| (u.to_string(), r)).collect(), ..Default::default() })
        }
    }

    struct FakeBrowser(Arc<Site>);

    struct FakeSession(Arc<Site>);

    #[async_trait::async_trait]
    impl Browser for FakeBrowser {
        type Session = FakeSession;

        async fn open(&self) -> Result<FakeSession, RenderError> {
            self.0.opened.fetch_add(1, Ordering::SeqCst);
            Ok(FakeSession(Arc::clone(&self.0)))
        }
    }

    #[async_trait::async_trait]
    impl Session for FakeSession {
        async fn navigate(&mut self, url: &Url, opts: &RenderOptions) -> Result<Navigation, RenderError> {
            self.0.navigations.fetch_add(1, Ordering::SeqCst);
            let route = self.0.routes.get(url.as_str()).cloned();
            match route {
                Some(Route::Page { status, html, subresources }) => {
                    for kind in subresources {
                        self.0.requested.lock().unwrap().push(kind);
                        if !opts.block.allows(kind) {
                            self.0.aborted.lock().unwrap().push(kind);
                        }
                    }
                    Ok(Navigation::Document { status, html: html.to_string(), final_url: url.clone() })
                }
                Some(Route::Redirect(location)) => Ok(Navigation::Redirect { status: 302, location: location.into() }),
                Some(Route::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!("hang route never completes")
                }
                Some(Route::Fail(message)) => Err(crate::render::classify_navigation_error(message)),
                None => Err(RenderError::Navigation(format!("no route for {url}"))),
            }
        }

        fn release(&mut self) {
            self.0.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Browser whose tab creation never completes.
    struct StalledBrowser(Arc<Site>);

    #[async_trait::async_trait]
    impl Browser for StalledBrowser {
        type Session = FakeSession;

        async fn open(&self) -> Result<FakeSession, RenderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(FakeSession(Arc::clone(&self.0)))
        }
    }

    fn engine(site: &Arc<Site>, pool_size: usize) -> RenderEngine<FakeBrowser> {
        RenderEngine::new(FakeBrowser(Arc::clone(site)), pool_size, Duration::from_millis(200))
    }

    fn page(html: &'static str) -> Route {
        Route::Page { status: 200, html, subresources: vec![] }
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_renders_document() {
        let site = Site::with([("http://example.test/", page("<html><body>A</body></html>"))]);
        let result = engine(&site, 1).render(&url("http://example.test/"), &RenderOptions::default()).await.unwrap();

        assert_eq!(result.status, 200);
        assert_eq!(result.html, "<html><body>A</body></html>");
        assert_eq!(result.redirects, 0);
        assert_eq!(site.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_follows_redirect_chain_within_limit() {
        let site = Site::with([
            ("http://example.test/a", Route::Redirect("http://example.test/b")),
            ("http://example.test/b", Route::Redirect("/c")),
            ("http://example.test/c", page("<p>C</p>")),
        ]);
        let opts = RenderOptions { max_redirects: 2, ..Default::default() };
        let result = engine(&site, 1).render(&url("http://example.test/a"), &opts).await.unwrap();

        assert_eq!(result.final_url.as_str(), "http://example.test/c");
        assert_eq!(result.redirects, 2);
        assert_eq!(result.html, "<p>C</p>");
    }

    #[tokio::test]
    async fn test_redirect_chain_over_limit_fails() {
        let site = Site::with([
            ("http://example.test/a", Route::Redirect("/b")),
            ("http://example.test/b", Route::Redirect("/c")),
            ("http://example.test/c", page("<p>C</p>")),
        ]);
        let opts = RenderOptions { max_redirects: 1, ..Default::default() };
        let result = engine(&site, 1).render(&url("http://example.test/a"), &opts).await;

        assert_eq!(result, Err(RenderError::TooManyRedirects(1)));
        assert_eq!(site.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_redirect_loop_is_bounded() {
        let site = Site::with([
            ("http://example.test/a", Route::Redirect("/b")),
            ("http://example.test/b", Route::Redirect("/a")),
        ]);
        let result = engine(&site, 1).render(&url("http://example.test/a"), &RenderOptions::default()).await;

        assert_eq!(result, Err(RenderError::TooManyRedirects(5)));
        assert_eq!(site.navigations.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_redirect_to_other_scheme_rejected() {
        let site = Site::with([("http://example.test/a", Route::Redirect("ftp://example.test/file"))]);
        let result = engine(&site, 1).render(&url("http://example.test/a"), &RenderOptions::default()).await;
        assert!(matches!(result, Err(RenderError::InvalidRedirect(_))));
    }

    #[tokio::test]
    async fn test_blocked_image_does_not_stop_document() {
        let site = Site::with([(
            "http://example.test/",
            Route::Page {
                status: 200,
                html: "<p>A</p>",
                subresources: vec![ResourceKind::Image, ResourceKind::Script, ResourceKind::Font],
            },
        )]);
        let result = engine(&site, 1).render(&url("http://example.test/"), &RenderOptions::default()).await.unwrap();

        assert_eq!(result.status, 200);
        assert_eq!(*site.aborted.lock().unwrap(), vec![ResourceKind::Image, ResourceKind::Font]);
        assert_eq!(site.requested.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_timeout_releases_session() {
        let site = Site::with([("http://example.test/slow", Route::Hang)]);
        let engine = engine(&site, 1);
        let opts = RenderOptions { timeout_ms: 50, ..Default::default() };

        let result = engine.render(&url("http://example.test/slow"), &opts).await;
        assert_eq!(result, Err(RenderError::Timeout(50)));
        assert_eq!(site.released.load(Ordering::SeqCst), 1);
        assert_eq!(engine.pool().available(), 1);
    }

    #[tokio::test]
    async fn test_stalled_tab_creation_hits_deadline() {
        let site = Site::with([("http://example.test/", page("<p>A</p>"))]);
        let engine = RenderEngine::new(StalledBrowser(Arc::clone(&site)), 1, Duration::from_millis(200));
        let opts = RenderOptions { timeout_ms: 100, ..Default::default() };

        let outcome =
            tokio::time::timeout(Duration::from_secs(2), engine.render(&url("http://example.test/"), &opts)).await;

        assert_eq!(outcome.expect("render returned within its deadline"), Err(RenderError::Timeout(100)));
        assert_eq!(engine.pool().available(), 1);
    }

    #[tokio::test]
    async fn test_navigation_error_releases_session() {
        let site = Site::with([("http://nope.invalid/", Route::Fail("net::ERR_NAME_NOT_RESOLVED"))]);
        let engine = engine(&site, 1);

        let result = engine.render(&url("http://nope.invalid/"), &RenderOptions::default()).await;
        assert!(matches!(result, Err(RenderError::Unresolvable(_))));
        assert_eq!(site.released.load(Ordering::SeqCst), 1);
        assert_eq!(engine.pool().available(), 1);
    }

    #[tokio::test]
    async fn test_empty_document_is_no_document() {
        let site = Site::with([("http://example.test/", page("   "))]);
        let result = engine(&site, 1).render(&url("http://example.test/"), &RenderOptions::default()).await;
        assert_eq!(result, Err(RenderError::NoDocument));
    }

    #[tokio::test]
    async fn test_postprocessing_applied() {
        let site = Site::with([(
            "http://example.test/",
            page(r#"<head><meta name="prerender-status-code" content="404"><script>x()</script></head>"#),
        )]);
        let result = engine(&site, 1).render(&url("http://example.test/"), &RenderOptions::default()).await.unwrap();

        assert_eq!(result.status, 404);
        assert!(!result.html.contains("<script"));
    }

    #[tokio::test]
    async fn test_busy_pool_rejects_extra_render() {
        let site = Site::with([("http://example.test/slow", Route::Hang), ("http://example.test/", page("<p>A</p>"))]);
        let engine = Arc::new(engine(&site, 1));
        let opts = RenderOptions { timeout_ms: 1_000, ..Default::default() };

        let busy = {
            let engine = Arc::clone(&engine);
            let opts = opts.clone();
            tokio::spawn(async move { engine.render(&url("http://example.test/slow"), &opts).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = engine.render(&url("http://example.test/"), &opts).await;
        assert!(matches!(result, Err(RenderError::PoolExhausted(200))));

        assert_eq!(busy.await.unwrap(), Err(RenderError::Timeout(1_000)));
        assert_eq!(site.opened.load(Ordering::SeqCst), site.released.load(Ordering::SeqCst));
    }
}
