//! Cache key derivation and filename-safe key encoding.

use sha2::{Digest, Sha256};

/// Longest sanitized key used verbatim as a filename stem.
const MAX_FILENAME_STEM: usize = 200;

/// Compute a digest cache key for a normalized URL within a namespace.
pub fn compute_cache_key(namespace: &str, normalized_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b"\n");
    hasher.update(normalized_url.as_bytes());
    hex::encode(hasher.finalize())
}

/// How a normalized URL becomes a cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStrategy {
    /// The normalized URL string is the key.
    Plain,
    /// SHA-256 hex digest of namespace and normalized URL.
    Hashed { namespace: String },
}

impl KeyStrategy {
    pub fn from_config(hash_keys: bool, namespace: &str) -> Self {
        if hash_keys { KeyStrategy::Hashed { namespace: namespace.to_string() } } else { KeyStrategy::Plain }
    }

    /// Derive the cache key for a normalized URL.
    pub fn key_for(&self, normalized_url: &str) -> String {
        match self {
            KeyStrategy::Plain => normalized_url.to_string(),
            KeyStrategy::Hashed { namespace } => compute_cache_key(namespace, normalized_url),
        }
    }
}

/// Encode a cache key as a filename stem.
///
/// Every character outside `[A-Za-z0-9]` becomes `_`. Stems longer than the
/// filesystem-friendly limit are truncated and suffixed with a digest of the
/// full key so distinct long keys stay distinct.
pub fn sanitize_key(key: &str) -> String {
    let sanitized: String = key.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect();
    if sanitized.len() <= MAX_FILENAME_STEM {
        return sanitized;
    }

    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    let keep = MAX_FILENAME_STEM - digest.len() - 1;
    format!("{}_{}", &sanitized[..keep], digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_stability() {
        let hash1 = compute_cache_key("sites", "https://example.com/");
        let hash2 = compute_cache_key("sites", "https://example.com/");
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_hash_different_namespace() {
        let a = compute_cache_key("sites", "https://example.com/");
        let b = compute_cache_key("staging", "https://example.com/");
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_format() {
        let hash = compute_cache_key("sites", "https://example.com/");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_strategy() {
        let url = "http://example.com/a";
        assert_eq!(KeyStrategy::from_config(false, "sites").key_for(url), url);

        let hashed = KeyStrategy::from_config(true, "sites").key_for(url);
        assert_eq!(hashed, compute_cache_key("sites", url));
    }

    #[test]
    fn test_sanitize_key_replaces_unsafe_characters() {
        assert_eq!(sanitize_key("http://example.com/a?b=1"), "http___example_com_a_b_1");
        assert_eq!(sanitize_key("../../etc/passwd"), "______etc_passwd");
    }

    #[test]
    fn test_sanitize_key_bounds_length() {
        let long_a = format!("https://example.com/{}", "a".repeat(400));
        let long_b = format!("https://example.com/{}b", "a".repeat(400));

        let a = sanitize_key(&long_a);
        let b = sanitize_key(&long_b);
        assert_eq!(a.len(), MAX_FILENAME_STEM);
        assert_eq!(b.len(), MAX_FILENAME_STEM);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }
}
