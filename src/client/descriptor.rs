//! Immutable request descriptions.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::cache::{endpoint_key, request_signature, CacheOptions, CachePriority};
use crate::transport::Method;
use crate::{Error, ErrorContext, Result};

/// Response caching requested for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachePolicy {
    pub enabled: bool,
    pub ttl: Option<Duration>,
    pub priority: CachePriority,
    pub tags: BTreeSet<String>,
}

impl CachePolicy {
    pub(crate) fn to_options(&self) -> CacheOptions {
        CacheOptions {
            ttl: self.ttl,
            priority: self.priority,
            tags: self.tags.clone(),
        }
    }
}

/// A fully-specified call. Endpoint and signature are derived once at construction.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    url: url::Url,
    headers: Vec<(String, String)>,
    body: Option<Value>,
    timeout: Option<Duration>,
    retries: Option<u32>,
    cache: CachePolicy,
    endpoint: String,
    signature: String,
}

impl RequestDescriptor {
    pub fn builder(url: impl Into<String>) -> RequestDescriptorBuilder {
        RequestDescriptorBuilder::new(url)
    }

    /// Plain GET with default options.
    pub fn get(url: impl Into<String>) -> Result<Self> {
        Self::builder(url).build()
    }

    /// Build from the per-call options table.
    pub fn from_options(url: impl Into<String>, options: CallOptions) -> Result<Self> {
        options.into_builder(url).build()
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &url::Url {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Per-call timeout override.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Per-call retry budget override.
    pub fn retries(&self) -> Option<u32> {
        self.retries
    }

    pub fn cache(&self) -> &CachePolicy {
        &self.cache
    }

    /// Breaker key (host + path).
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Cache and dedup key (method + URL + body).
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// GET requests with caching switched on.
    pub fn is_cache_eligible(&self) -> bool {
        self.method.is_safe() && self.cache.enabled
    }

    /// Only safe requests are ever coalesced.
    pub fn is_dedup_eligible(&self) -> bool {
        self.method.is_safe()
    }
}

pub struct RequestDescriptorBuilder {
    url: String,
    method: Method,
    headers: Vec<(String, String)>,
    body: Option<Value>,
    timeout: Option<Duration>,
    retries: Option<u32>,
    cache: CachePolicy,
}

impl RequestDescriptorBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            headers: Vec::new(),
            body: None,
            timeout: None,
            retries: None,
            cache: CachePolicy::default(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a header. A later value for the same name (case-insensitive) replaces the earlier one.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn cache(mut self, enabled: bool) -> Self {
        self.cache.enabled = enabled;
        self
    }

    /// Enables caching with the given TTL.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache.enabled = true;
        self.cache.ttl = Some(ttl);
        self
    }

    pub fn priority(mut self, priority: CachePriority) -> Self {
        self.cache.priority = priority;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.cache.tags.insert(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Result<RequestDescriptor> {
        let url = url::Url::parse(&self.url).map_err(|e| {
            Error::validation_with_context(
                format!("invalid request URL: {}", e),
                ErrorContext::new()
                    .with_field_path("descriptor.url")
                    .with_details(self.url.clone())
                    .with_source("descriptor_builder"),
            )
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::validation_with_context(
                format!("unsupported URL scheme '{}'", url.scheme()),
                ErrorContext::new()
                    .with_field_path("descriptor.url")
                    .with_source("descriptor_builder"),
            ));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(Error::validation_with_context(
                "timeout must be greater than zero",
                ErrorContext::new()
                    .with_field_path("descriptor.timeout")
                    .with_source("descriptor_builder"),
            ));
        }

        let endpoint = endpoint_key(&url);
        let signature = request_signature(self.method, &url, self.body.as_ref());
        Ok(RequestDescriptor {
            method: self.method,
            url,
            headers: self.headers,
            body: self.body,
            timeout: self.timeout,
            retries: self.retries,
            cache: self.cache,
            endpoint,
            signature,
        })
    }
}

/// Per-call options in their wire/config form.
///
/// ```rust
/// use callguard::client::{CallOptions, RequestDescriptor};
///
/// let opts: CallOptions = serde_json::from_str(
///     r#"{"cache": true, "cacheTtl": 5000, "priority": "high", "tags": ["user"]}"#,
/// ).unwrap();
/// let req = RequestDescriptor::from_options("https://api.example.com/profile", opts).unwrap();
/// assert!(req.is_cache_eligible());
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CallOptions {
    pub method: Option<Method>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    /// Milliseconds.
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    pub cache: Option<bool>,
    /// Milliseconds.
    pub cache_ttl: Option<u64>,
    pub priority: Option<CachePriority>,
    pub tags: Vec<String>,
}

impl CallOptions {
    pub fn into_builder(self, url: impl Into<String>) -> RequestDescriptorBuilder {
        let mut b = RequestDescriptorBuilder::new(url);
        if let Some(m) = self.method {
            b = b.method(m);
        }
        for (k, v) in self.headers {
            b = b.header(k, v);
        }
        if let Some(body) = self.body {
            b = b.body(body);
        }
        if let Some(ms) = self.timeout {
            b = b.timeout(Duration::from_millis(ms));
        }
        if let Some(r) = self.retries {
            b = b.retries(r);
        }
        if let Some(ms) = self.cache_ttl {
            b = b.cache_ttl(Duration::from_millis(ms));
        }
        // An explicit `cache: false` wins over a TTL.
        if let Some(enabled) = self.cache {
            b = b.cache(enabled);
        }
        if let Some(p) = self.priority {
            b = b.priority(p);
        }
        b.tags(self.tags)
    }
}
