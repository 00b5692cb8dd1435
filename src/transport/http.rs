use async_trait::async_trait;
use reqwest::Proxy;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

use super::{HttpCall, Method, TransportError, WireRequest, WireResponse};
use crate::utils::env_parse;
use crate::Result;

/// Connection-pool tuning for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Hard ceiling applied by reqwest itself; per-attempt timeouts are enforced above it.
    pub request_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
    pub proxy_url: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            pool_max_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
            proxy_url: None,
        }
    }
}

impl TransportConfig {
    /// Defaults overlaid with `CALLGUARD_HTTP_*` / `CALLGUARD_PROXY_URL`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(n) = env_parse::<usize>("CALLGUARD_HTTP_POOL_MAX_IDLE_PER_HOST") {
            cfg.pool_max_idle_per_host = n;
        }
        if let Some(secs) = env_parse::<u64>("CALLGUARD_HTTP_POOL_IDLE_TIMEOUT_SECS") {
            cfg.pool_idle_timeout = Duration::from_secs(secs);
        }
        cfg.proxy_url = env::var("CALLGUARD_PROXY_URL").ok();
        cfg
    }
}

/// reqwest-backed [`HttpCall`] speaking JSON.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Some(config.pool_idle_timeout));

        if let Some(proxy_url) = &config.proxy_url {
            if let Ok(proxy) = Proxy::all(proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder
            .build()
            .map_err(|e| crate::Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self { client })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(&TransportConfig::from_env())
    }
}

#[async_trait]
impl HttpCall for HttpTransport {
    async fn call(&self, request: WireRequest) -> std::result::Result<WireResponse, TransportError> {
        let url = request.url.as_str();
        let mut req = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
            Method::Delete => self.client.delete(url),
            Method::Patch => self.client.patch(url),
        };

        req = req.header("accept", "application/json");
        for (k, v) in &request.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(body) = &request.body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let headers: HashMap<String, String> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|s| (k.as_str().to_ascii_lowercase(), s.to_string()))
            })
            .collect();
        let body = resp.bytes().await?;

        Ok(WireResponse {
            status,
            headers,
            body,
        })
    }
}
