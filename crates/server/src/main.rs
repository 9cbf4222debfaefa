//! rendition server entry point.
//!
//! Loads configuration, opens the cache backend, launches the browser and
//! serves the render proxy over HTTP (or HTTPS when a certificate is set).
//! Logs are JSON lines on stdout, filtered by `RUST_LOG` (default `info`).

use anyhow::{Context, Result};
use rendition_client::Renderer;
use rendition_core::cache::open_backend;
use rendition_core::{AppConfig, Cache};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod error;
mod flight;
mod orchestrator;
mod routes;

use orchestrator::Orchestrator;
use routes::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    let addr = config.listen_addr()?;

    let backend = open_backend(&config).await.context("failed to open cache backend")?;
    let cache = Cache::new(backend, config.cache_ttl());
    let renderer = launch_renderer(&config).await?;

    if let Some(interval) = config.purge_interval() {
        spawn_purge(cache.clone(), interval);
    }

    let orchestrator = Arc::new(Orchestrator::from_config(&config, cache, renderer));
    let app = routes::router(AppState::new(orchestrator));

    match config.tls_paths() {
        Some((cert, key)) => {
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                .await
                .context("failed to load TLS certificate")?;
            let handle = axum_server::Handle::new();
            let shutdown = handle.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                shutdown.graceful_shutdown(Some(Duration::from_secs(10)));
            });

            tracing::info!(%addr, tls = true, "Starting rendition server");
            axum_server::bind_rustls(addr, tls).handle(handle).serve(app.into_make_service()).await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("failed to bind {addr}"))?;

            tracing::info!(%addr, tls = false, "Starting rendition server");
            axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
        }
    }

    tracing::info!("rendition server stopped");
    Ok(())
}

#[cfg(feature = "render")]
async fn launch_renderer(config: &AppConfig) -> Result<Arc<dyn Renderer>> {
    use rendition_client::{ChromeBrowser, ChromeSettings, RenderEngine};

    let browser = ChromeBrowser::launch(ChromeSettings::from_config(config))
        .await
        .context("failed to launch browser")?;
    Ok(Arc::new(RenderEngine::new(browser, config.pool_size, config.pool_checkout_timeout())))
}

#[cfg(not(feature = "render"))]
async fn launch_renderer(_config: &AppConfig) -> Result<Arc<dyn Renderer>> {
    anyhow::bail!("built without the `render` feature; no browser available")
}

/// Periodically delete expired cache entries.
fn spawn_purge(cache: Cache, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let deleted = cache.purge_expired().await;
            if deleted > 0 {
                tracing::info!(deleted, backend = cache.backend_name(), "purged expired cache entries");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
