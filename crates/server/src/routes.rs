//! HTTP surface.
//!
//! - `GET /health`: cache backend name, connection state and TTL as JSON
//! - `GET /<target-url>`: the rendered page for `<target-url>`; the request's
//!   own query string is appended to the target

use crate::error::ProxyError;
use crate::orchestrator::Orchestrator;
use axum::extract::State;
use axum::http::header::{CONTENT_TYPE, USER_AGENT};
use axum::http::{HeaderMap, HeaderName, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use rendition_client::UrlError;
use rendition_core::ConnectionState;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", get(proxy))
        .route("/{*target}", get(proxy))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct Health {
    backend: &'static str,
    state: ConnectionState,
    ttl_secs: u64,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    let cache = state.orchestrator.cache();
    Json(Health { backend: cache.backend_name(), state: cache.state(), ttl_secs: cache.ttl().as_secs() })
}

/// Target URL carried by a request path such as `/https://example.com/a?b=1`.
///
/// The path is percent-decoded, so `/https%3A%2F%2Fexample.com%2Fa` names the
/// same target. The query string is passed through as sent.
fn target_url(uri: &Uri) -> Result<String, UrlError> {
    let raw = uri.path().trim_start_matches('/');
    let path = urlencoding::decode(raw).map_err(|e| UrlError::InvalidUrl(format!("{raw}: {e}")))?;
    Ok(match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.into_owned(),
    })
}

async fn proxy(State(state): State<AppState>, uri: Uri, headers: HeaderMap) -> Response {
    let target = match target_url(&uri) {
        Ok(target) => target,
        Err(e) => {
            tracing::info!(path = uri.path(), error = %e, "rejecting undecodable target");
            return ProxyError::from(e).into_response();
        }
    };
    let user_agent = headers.get(USER_AGENT).and_then(|v| v.to_str().ok()).unwrap_or("-");
    tracing::info!(url = %target, user_agent, "request {target} {user_agent}");

    let start = Instant::now();
    let result = state.orchestrator.handle(&target).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(reply) => {
            tracing::info!(
                url = %target,
                status = reply.status,
                elapsed_ms,
                cache = reply.cache.as_str(),
                "got {} in {}ms for {}",
                reply.status,
                elapsed_ms,
                target
            );
            let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, [(CONTENT_TYPE, "text/html; charset=utf-8"), (X_CACHE, reply.cache.as_str())], reply.body)
                .into_response()
        }
        Err(err) => {
            let status = err.status();
            tracing::info!(
                url = %target,
                status = status.as_u16(),
                elapsed_ms,
                error = %err,
                "got {} in {}ms for {}",
                status.as_u16(),
                elapsed_ms,
                target
            );
            err.into_response()
        }
    }
}
