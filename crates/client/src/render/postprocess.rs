//! Rendered-HTML clean-up applied before a page is returned or cached.

use super::RenderOptions;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b([^>]*)>.*?</script\s*>").expect("valid script regex"));

static LD_JSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\btype\s*=\s*["']?application/ld\+json"#).expect("valid ld+json regex")
});

static META_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<meta\b[^>]*>").expect("valid meta regex"));

static STATUS_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bname\s*=\s*["']?prerender-status-code\b"#).expect("valid meta name regex")
});

static CONTENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bcontent\s*=\s*["']?\s*(\d{3})\b"#).expect("valid meta content regex"));

/// Remove `<script>` elements, keeping structured data (`application/ld+json`).
pub fn strip_scripts(html: &str) -> String {
    SCRIPT_RE
        .replace_all(html, |caps: &Captures| {
            if LD_JSON_RE.is_match(&caps[1]) { caps[0].to_string() } else { String::new() }
        })
        .into_owned()
}

/// Status requested by `<meta name="prerender-status-code" content="NNN">`.
pub fn status_override(html: &str) -> Option<u16> {
    META_RE
        .find_iter(html)
        .map(|m| m.as_str())
        .filter(|tag| STATUS_NAME_RE.is_match(tag))
        .find_map(|tag| CONTENT_RE.captures(tag)?.get(1)?.as_str().parse::<u16>().ok())
        .filter(|status| (100..=599).contains(status))
}

/// Apply the enabled clean-up steps, returning the final HTML and status.
///
/// The status override is read before scripts are stripped so both steps see
/// the document as the browser serialized it.
pub fn apply(html: String, status: u16, opts: &RenderOptions) -> (String, u16) {
    let status = if opts.honor_status_meta {
        match status_override(&html) {
            Some(overridden) if overridden != status => {
                tracing::debug!(from = status, to = overridden, "status overridden by meta tag");
                overridden
            }
            _ => status,
        }
    } else {
        status
    };

    let html = if opts.strip_scripts { strip_scripts(&html) } else { html };
    (html, status)
}
