//! Structured errors for the rendition server.
//!
//! Cache failures never reach this type: the cache layer degrades them to a
//! miss or a no-op. What is left is either a bad target URL or a failed render.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use rendition_client::{RenderError, UrlError};

/// Terminal error for one proxied request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    /// Target URL is empty or cannot be normalized.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(#[from] UrlError),

    #[error("RENDER_FAILED: {0}")]
    Render(#[from] RenderError),

    /// The render task died without producing a result.
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl ProxyError {
    /// HTTP status surfaced to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            ProxyError::Render(err) => match err {
                RenderError::Unresolvable(_) => StatusCode::BAD_REQUEST,
                RenderError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                RenderError::PoolExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
                RenderError::NoDocument => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ProxyError::InvalidUrl(UrlError::Empty), StatusCode::BAD_REQUEST),
            (ProxyError::Render(RenderError::Unresolvable("dns".into())), StatusCode::BAD_REQUEST),
            (ProxyError::Render(RenderError::Timeout(10_000)), StatusCode::GATEWAY_TIMEOUT),
            (ProxyError::Render(RenderError::PoolExhausted(5_000)), StatusCode::SERVICE_UNAVAILABLE),
            (ProxyError::Render(RenderError::NoDocument), StatusCode::NOT_FOUND),
            (ProxyError::Render(RenderError::TooManyRedirects(5)), StatusCode::INTERNAL_SERVER_ERROR),
            (ProxyError::Render(RenderError::Navigation("crash".into())), StatusCode::INTERNAL_SERVER_ERROR),
            (ProxyError::Internal("panic".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status(), expected, "{err}");
        }
    }

    #[test]
    fn test_into_response() {
        let response = ProxyError::Render(RenderError::Timeout(50)).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain; charset=utf-8");
    }
}
