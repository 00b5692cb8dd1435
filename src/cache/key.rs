//! Request signature generation.
//!
//! The signature doubles as the cache key and the deduplication key for a request.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::transport::Method;

/// Deterministic signature of a request: SHA-256 over a canonical JSON document of
/// method, URL and body.
///
/// `serde_json::Value` objects are ordered maps, so two bodies with the same members in a
/// different insertion order hash identically.
pub fn request_signature(method: Method, url: &url::Url, body: Option<&serde_json::Value>) -> String {
    let mut parts: BTreeMap<&str, String> = BTreeMap::new();
    parts.insert("method", method.as_str().to_string());
    parts.insert("url", url.as_str().to_string());
    if let Some(b) = body {
        parts.insert("body", serde_json::to_string(b).unwrap_or_default());
    }
    let canonical = serde_json::to_string(&parts).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Breaker key for a URL: host (plus explicit port) and path, without query or fragment.
pub fn endpoint_key(url: &url::Url) -> String {
    let host = url.host_str().unwrap_or("");
    match url.port() {
        Some(port) => format!("{}:{}{}", host, port, url.path()),
        None => format!("{}{}", host, url.path()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn url(s: &str) -> url::Url {
        url::Url::parse(s).unwrap()
    }

    #[test]
    fn test_signature_is_deterministic() {
        let u = url("https://api.example.com/profile");
        let a = request_signature(Method::Get, &u, None);
        let b = request_signature(Method::Get, &u, None);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_signature_ignores_body_key_order() {
        let u = url("https://api.example.com/search");
        let a = request_signature(Method::Post, &u, Some(&json!({"q": "x", "limit": 5})));
        let b = request_signature(Method::Post, &u, Some(&json!({"limit": 5, "q": "x"})));
        assert_eq!(a, b);
    }

    #[test]
    fn test_signature_distinguishes_method_url_and_body() {
        let u = url("https://api.example.com/items");
        let base = request_signature(Method::Get, &u, None);
        assert_ne!(base, request_signature(Method::Delete, &u, None));
        assert_ne!(
            base,
            request_signature(Method::Get, &url("https://api.example.com/items?page=2"), None)
        );
        assert_ne!(
            request_signature(Method::Post, &u, Some(&json!({"a": 1}))),
            request_signature(Method::Post, &u, Some(&json!({"a": 2})))
        );
    }

    #[test]
    fn test_endpoint_key_drops_query() {
        assert_eq!(
            endpoint_key(&url("https://api.example.com/v1/mood?day=3#top")),
            "api.example.com/v1/mood"
        );
        assert_eq!(
            endpoint_key(&url("http://localhost:8080/health")),
            "localhost:8080/health"
        );
    }
}
