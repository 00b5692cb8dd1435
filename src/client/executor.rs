//! Call orchestration: breaker gate, cache, coalescing, retry loop.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::builder::HttpExecutorBuilder;
use super::config::ExecutorConfig;
use super::descriptor::{CallOptions, RequestDescriptor};
use super::envelope::ResponseEnvelope;
use super::signals::ExecutorSignals;
use crate::auth::{AuthHeaderProvider, TokenRefresher};
use crate::cache::{CacheStore, CacheSweeper};
use crate::error_code::{message_from_body, CallError};
use crate::interceptors::InterceptorPipeline;
use crate::metrics::{CallMetric, MetricsSink};
use crate::resilience::{CircuitBreakerRegistry, RequestDeduplicator, RetryPolicy};
use crate::transport::{HttpCall, TransportError, WireRequest, WireResponse};
use crate::Result;

/// Resilient JSON-over-HTTP executor.
///
/// `execute` never fails and never panics: every outcome, including configuration-free
/// fast paths, is a [`ResponseEnvelope`].
///
/// ```rust,no_run
/// use callguard::client::{HttpExecutor, RequestDescriptor};
/// use std::time::Duration;
///
/// # async fn run() -> callguard::Result<()> {
/// let executor = HttpExecutor::builder().build()?;
/// let req = RequestDescriptor::builder("https://api.example.com/profile")
///     .cache_ttl(Duration::from_secs(5))
///     .tag("user")
///     .build()?;
/// let resp = executor.execute(&req).await;
/// if resp.success {
///     println!("{:?} (cached: {})", resp.data, resp.cached);
/// }
/// # Ok(())
/// # }
/// ```
pub struct HttpExecutor {
    pub(crate) core: Arc<ExecutorCore>,
    pub(crate) interceptors: InterceptorPipeline,
    pub(crate) sweeper: Mutex<Option<CacheSweeper>>,
}

/// State shared with spawned coalesced calls.
pub(crate) struct ExecutorCore {
    pub(crate) config: ExecutorConfig,
    pub(crate) transport: Arc<dyn HttpCall>,
    pub(crate) cache: Arc<CacheStore>,
    pub(crate) breakers: Arc<CircuitBreakerRegistry>,
    pub(crate) dedup: Arc<RequestDeduplicator>,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    pub(crate) auth: Arc<dyn AuthHeaderProvider>,
    pub(crate) refresher: Option<Arc<dyn TokenRefresher>>,
}

impl HttpExecutor {
    pub fn builder() -> HttpExecutorBuilder {
        HttpExecutorBuilder::new()
    }

    /// Execute one logical call.
    pub async fn execute(&self, request: &RequestDescriptor) -> ResponseEnvelope {
        self.interceptors
            .execute(request, || Arc::clone(&self.core).execute(request))
            .await
    }

    /// GET with default options.
    pub async fn get(&self, url: &str) -> Result<ResponseEnvelope> {
        let request = RequestDescriptor::get(url)?;
        Ok(self.execute(&request).await)
    }

    /// Execute with the per-call options table.
    pub async fn request(&self, url: &str, options: CallOptions) -> Result<ResponseEnvelope> {
        let request = RequestDescriptor::from_options(url, options)?;
        Ok(self.execute(&request).await)
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.core.config
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.core.cache
    }

    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.core.breakers
    }

    pub fn deduplicator(&self) -> &Arc<RequestDeduplicator> {
        &self.core.dedup
    }

    /// Drop every cached response carrying `tag`.
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        let removed = self.core.cache.invalidate_by_tag(tag);
        debug!(tag, removed, "invalidated cache tag");
        removed
    }

    pub fn signals(&self) -> ExecutorSignals {
        ExecutorSignals {
            cache: self.core.cache.stats(),
            breakers: self.core.breakers.snapshots(),
            in_flight: self.core.dedup.in_flight(),
        }
    }

    /// Clear the cache, every breaker and the coalescing map.
    pub fn reset(&self) {
        self.core.cache.clear();
        self.core.breakers.clear();
        self.core.dedup.clear();
        info!("executor state reset");
    }

    /// Stop the background sweep and reset all state.
    pub fn close(&self) {
        if let Ok(mut sweeper) = self.sweeper.lock() {
            if let Some(mut s) = sweeper.take() {
                s.stop();
            }
        }
        self.reset();
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .ok()
            .map(|s| s.as_ref().map(CacheSweeper::is_running).unwrap_or(false))
            .unwrap_or(false)
    }
}

impl ExecutorCore {
    async fn execute(self: Arc<Self>, request: &RequestDescriptor) -> ResponseEnvelope {
        let started = Instant::now();
        let endpoint = request.endpoint();

        if !self.breakers.can_proceed(endpoint) {
            info!(endpoint, method = request.method().as_str(), "circuit open; rejecting call");
            return ResponseEnvelope::circuit_open(endpoint);
        }

        if request.is_cache_eligible() {
            if let Some(data) = self.cache.get::<Value>(request.signature()) {
                debug!(endpoint, signature = request.signature(), "cache hit");
                return ResponseEnvelope::cached(data).with_duration(started.elapsed());
            }
        }

        if self.config.dedup_enabled && request.is_dedup_eligible() {
            let core = Arc::clone(&self);
            let owned = request.clone();
            self.dedup
                .join(request.signature(), move || async move {
                    core.perform_with_retry(&owned).await
                })
                .await
        } else {
            self.perform_with_retry(request).await
        }
    }

    async fn perform_with_retry(&self, request: &RequestDescriptor) -> ResponseEnvelope {
        let started = Instant::now();
        let endpoint = request.endpoint();
        let policy = RetryPolicy::new(
            self.config.retry,
            request.retries().unwrap_or(self.config.max_retries),
        );
        let timeout = request.timeout().unwrap_or(self.config.default_timeout);

        let mut retry: u32 = 0;
        let mut attempt_index: u32 = 0;
        let mut refreshed = false;

        loop {
            let outcome = self.attempt(request, timeout, attempt_index).await;
            attempt_index += 1;

            let mut error = match outcome {
                Ok((status, data)) => {
                    self.breakers.record_outcome(endpoint, true);
                    if request.is_cache_eligible() {
                        if let Some(value) = &data {
                            self.store(request, value);
                        }
                    }
                    return ResponseEnvelope::success(data, status, retry, started.elapsed());
                }
                Err(e) => e,
            };

            if error.status() == Some(401) {
                if let Some(refresher) = &self.refresher {
                    if !refreshed {
                        refreshed = true;
                        match refresher.refresh().await {
                            Ok(()) => {
                                debug!(endpoint, "credentials refreshed; retrying once");
                                continue;
                            }
                            Err(reason) => {
                                warn!(endpoint, reason = reason.as_str(), "token refresh failed");
                                refresher.session_expired().await;
                                error = CallError::AuthenticationRequired { message: reason };
                            }
                        }
                    } else {
                        refresher.session_expired().await;
                        error = CallError::AuthenticationRequired {
                            message: "credentials rejected after refresh".to_string(),
                        };
                    }
                }
            }

            if policy.should_retry(retry, &error) {
                let delay = policy.delay_for(retry, &error);
                debug!(
                    endpoint,
                    method = request.method().as_str(),
                    attempt = retry,
                    error = error.kind(),
                    delay_ms = delay.as_millis() as u64,
                    "scheduling retry"
                );
                tokio::time::sleep(delay).await;
                retry += 1;
                continue;
            }

            if error.trips_breaker() {
                self.breakers.record_outcome(endpoint, false);
            }
            info!(
                endpoint,
                method = request.method().as_str(),
                status = error.status(),
                retry_count = retry,
                error = %error,
                "call failed"
            );
            return ResponseEnvelope::failure(error, retry).with_duration(started.elapsed());
        }
    }

    /// One network attempt: headers, timeout, classification and the per-attempt metric.
    async fn attempt(
        &self,
        request: &RequestDescriptor,
        timeout: Duration,
        attempt_index: u32,
    ) -> std::result::Result<(u16, Option<Value>), CallError> {
        let mut headers = request.headers().to_vec();
        let has_auth = headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("authorization"));
        if !has_auth {
            if let Some(value) = self.auth.authorization().await {
                headers.push(("authorization".to_string(), value));
            }
        }
        headers.push(("x-request-id".to_string(), Uuid::new_v4().to_string()));

        let wire = WireRequest {
            method: request.method(),
            url: request.url().clone(),
            headers,
            body: request.body().cloned(),
        };

        let started = Instant::now();
        let result = tokio::time::timeout(timeout, self.transport.call(wire)).await;
        let elapsed = started.elapsed();

        let (status, outcome) = match result {
            Err(_) => (
                None,
                Err(CallError::Timeout {
                    after_ms: timeout.as_millis() as u64,
                }),
            ),
            Ok(Err(TransportError::Timeout)) => (
                None,
                Err(CallError::Timeout {
                    after_ms: elapsed.as_millis() as u64,
                }),
            ),
            Ok(Err(e)) => (
                None,
                Err(CallError::Network {
                    message: e.to_string(),
                }),
            ),
            Ok(Ok(resp)) => (Some(resp.status), classify(resp)),
        };

        self.metrics.record(&CallMetric {
            endpoint: request.endpoint().to_string(),
            method: request.method(),
            duration_ms: elapsed.as_millis() as u64,
            status,
            attempt: attempt_index,
        });
        outcome
    }

    fn store(&self, request: &RequestDescriptor, value: &Value) {
        match self
            .cache
            .set(request.signature(), value, request.cache().to_options())
        {
            Ok(true) => debug!(endpoint = request.endpoint(), "response cached"),
            Ok(false) => {}
            Err(e) => warn!(endpoint = request.endpoint(), error = %e, "failed to cache response"),
        }
    }
}

fn classify(resp: WireResponse) -> std::result::Result<(u16, Option<Value>), CallError> {
    if !resp.is_success() {
        return Err(CallError::from_status(
            resp.status,
            message_from_body(&resp.body),
            resp.retry_after_ms(),
        ));
    }
    if resp.body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok((resp.status, None));
    }
    serde_json::from_slice::<Value>(&resp.body)
        .map(|v| (resp.status, Some(v)))
        .map_err(|e| CallError::InvalidResponse {
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_classify_success_and_errors() {
        let ok = WireResponse::new(200, Bytes::from_static(br#"{"a":1}"#));
        assert_eq!(classify(ok).unwrap(), (200, Some(serde_json::json!({"a": 1}))));

        let empty = WireResponse::new(204, Bytes::new());
        assert_eq!(classify(empty).unwrap(), (204, None));

        let garbage = WireResponse::new(200, Bytes::from_static(b"<html>"));
        assert_eq!(classify(garbage).unwrap_err().kind(), "invalid_response");

        let bad = WireResponse::new(400, Bytes::from_static(br#"{"message":"name required"}"#));
        assert_eq!(
            classify(bad).unwrap_err(),
            CallError::Client {
                status: 400,
                message: Some("name required".into())
            }
        );

        let limited = WireResponse::new(429, Bytes::new()).with_header("Retry-After", "2");
        assert_eq!(
            classify(limited).unwrap_err(),
            CallError::RateLimited {
                retry_after_ms: Some(2000)
            }
        );
    }
}
