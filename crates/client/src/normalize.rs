//! URL normalization for stable cache keys.
//!
//! The normalized string is both the cache key source and the URL handed to
//! the renderer. Normalization is a pure function of the input and the
//! configured [`QueryPolicy`]:
//!
//! 1. Trim surrounding whitespace
//! 2. Require an absolute `http`/`https` URL with a host
//! 3. Lowercase the host, drop default ports (via `url`)
//! 4. Remove the fragment (`#...`)
//! 5. Apply the query policy: drop volatile parameters, or collapse the
//!    whole query to a fixed marker

use rendition_core::AppConfig;
use rendition_core::config::QueryPolicy;
use std::fmt;
use url::Url;

/// Error type for URL normalization failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("URL is not absolute: {0}")]
    NotAbsolute(String),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("URL has no host: {0}")]
    MissingHost(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// A URL in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedUrl(Url);

impl NormalizedUrl {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }

    pub fn into_url(self) -> Url {
        self.0
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl AsRef<str> for NormalizedUrl {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Canonicalizes raw request URLs.
#[derive(Debug, Clone)]
pub struct Normalizer {
    policy: QueryPolicy,
    marker: String,
    volatile_params: Vec<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(QueryPolicy::Preserve, "cached=true", vec!["_escaped_fragment_".into()])
    }
}

impl Normalizer {
    pub fn new(policy: QueryPolicy, marker: impl Into<String>, volatile_params: Vec<String>) -> Self {
        Self { policy, marker: marker.into(), volatile_params }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.query_policy, config.query_marker.clone(), config.volatile_params.clone())
    }

    pub fn policy(&self) -> QueryPolicy {
        self.policy
    }

    /// Normalize a raw URL string.
    ///
    /// # Errors
    ///
    /// Returns a `UrlError` if the input is empty, relative, not http(s), or
    /// has no host.
    pub fn normalize(&self, raw: &str) -> Result<NormalizedUrl, UrlError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(UrlError::Empty);
        }

        let mut parsed = Url::parse(trimmed).map_err(|e| match e {
            url::ParseError::RelativeUrlWithoutBase => UrlError::NotAbsolute(trimmed.to_string()),
            url::ParseError::EmptyHost => UrlError::MissingHost(trimmed.to_string()),
            other => UrlError::InvalidUrl(other.to_string()),
        })?;

        match parsed.scheme() {
            "http" | "https" => {}
            scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
        }

        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(UrlError::MissingHost(trimmed.to_string()));
        }

        parsed.set_fragment(None);

        match self.policy {
            QueryPolicy::Collapse => {
                let marker = self.marker.trim_start_matches('?');
                parsed.set_query((!marker.is_empty()).then_some(marker));
            }
            QueryPolicy::Preserve => self.drop_volatile_params(&mut parsed),
        }

        Ok(NormalizedUrl(parsed))
    }

    fn drop_volatile_params(&self, url: &mut Url) {
        let Some(query) = url.query() else {
            return;
        };
        if query.is_empty() {
            url.set_query(None);
            return;
        }

        let is_volatile = |name: &str| self.volatile_params.iter().any(|v| v == name);
        if !url.query_pairs().any(|(name, _)| is_volatile(&name)) {
            return;
        }

        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(name, _)| !is_volatile(name))
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();

        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collapse() -> Normalizer {
        Normalizer::new(QueryPolicy::Collapse, "cached=true", vec![])
    }

    #[test]
    fn test_normalize_basic() {
        let url = Normalizer::default().normalize("https://example.com").unwrap();
        assert_eq!(url.as_str(), "https://example.com/");
    }

    #[test]
    fn test_normalize_lowercase_host_and_default_port() {
        let url = Normalizer::default().normalize("HTTP://EXAMPLE.COM:80/Path").unwrap();
        assert_eq!(url.as_str(), "http://example.com/Path");
    }

    #[test]
    fn test_fragment_hides_trailing_query() {
        let normalizer = Normalizer::default();
        let with_fragment = normalizer.normalize("http://example.com/a#frag?cached=true").unwrap();
        let plain = normalizer.normalize("http://example.com/a").unwrap();
        assert_eq!(with_fragment, plain);
        assert!(!with_fragment.as_str().contains('#'));
    }

    #[test]
    fn test_fragment_scenario_under_collapse() {
        let normalizer = collapse();
        let with_fragment = normalizer.normalize("http://example.com/a#frag?cached=true").unwrap();
        let plain = normalizer.normalize("http://example.com/a").unwrap();
        assert_eq!(with_fragment, plain);
        assert_eq!(plain.as_str(), "http://example.com/a?cached=true");
    }

    #[test]
    fn test_preserve_keeps_query() {
        let url = Normalizer::default().normalize("https://example.com/p?b=2&a=1").unwrap();
        assert_eq!(url.as_url().query(), Some("b=2&a=1"));
    }

    #[test]
    fn test_preserve_drops_volatile_params() {
        let normalizer = Normalizer::default();
        let url = normalizer.normalize("https://example.com/p?a=1&_escaped_fragment_=x").unwrap();
        assert_eq!(url.as_url().query(), Some("a=1"));

        let only_volatile = normalizer.normalize("https://example.com/p?_escaped_fragment_=").unwrap();
        assert_eq!(only_volatile.as_str(), "https://example.com/p");
    }

    #[test]
    fn test_empty_query_removed() {
        let url = Normalizer::default().normalize("https://example.com/?").unwrap();
        assert_eq!(url.as_str(), "https://example.com/");
    }

    #[test]
    fn test_collapse_replaces_any_query() {
        let normalizer = collapse();
        let a = normalizer.normalize("https://example.com/p?utm_source=x").unwrap();
        let b = normalizer.normalize("https://example.com/p?session=42").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_url().query(), Some("cached=true"));
    }

    #[test]
    fn test_collapse_with_empty_marker_strips_query() {
        let normalizer = Normalizer::new(QueryPolicy::Collapse, "", vec![]);
        let url = normalizer.normalize("https://example.com/p?x=1").unwrap();
        assert_eq!(url.as_str(), "https://example.com/p");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "https://example.com",
            "HTTP://Example.com:80/a/b/../c?x=1#top",
            "https://example.com/p?a=1&_escaped_fragment_=z&b=%20",
            "https://example.com/search?q=rust+lang&lang=en",
            "http://example.com/a#frag?cached=true",
            "https://[::1]:8443/x?",
        ];
        for normalizer in [Normalizer::default(), collapse()] {
            for input in inputs {
                let once = normalizer.normalize(input).unwrap();
                let twice = normalizer.normalize(once.as_str()).unwrap();
                assert_eq!(once, twice, "not idempotent for {input}");
            }
        }
    }

    #[test]
    fn test_trim_whitespace() {
        let url = Normalizer::default().normalize("  https://example.com  ").unwrap();
        assert_eq!(url.as_str(), "https://example.com/");
    }

    #[test]
    fn test_empty() {
        assert_eq!(Normalizer::default().normalize(""), Err(UrlError::Empty));
        assert_eq!(Normalizer::default().normalize("   "), Err(UrlError::Empty));
    }

    #[test]
    fn test_missing_scheme() {
        let result = Normalizer::default().normalize("example.com/a");
        assert!(matches!(result, Err(UrlError::NotAbsolute(_))));
    }

    #[test]
    fn test_missing_host() {
        let result = Normalizer::default().normalize("http://");
        assert!(matches!(result, Err(UrlError::MissingHost(_))));
    }

    #[test]
    fn test_unsupported_scheme() {
        let result = Normalizer::default().normalize("file:///etc/passwd");
        assert!(matches!(result, Err(UrlError::UnsupportedScheme(_))));

        let result = Normalizer::default().normalize("ftp://example.com/file");
        assert!(matches!(result, Err(UrlError::UnsupportedScheme(_))));
    }
}
