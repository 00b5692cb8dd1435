//! Optional interceptor hooks for application-layer cross-cutting concerns.
//!
//! Retries, breaking, coalescing and caching are built into the executor. Interceptors are
//! for what the application adds on top: audit logs, UI activity indicators, custom metrics.
//! Hooks observe; they cannot change the request or the outcome.

use async_trait::async_trait;

use crate::client::{RequestDescriptor, ResponseEnvelope};

/// Hooks run in registration order around every `execute`, fast paths included.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "interceptor"
    }

    async fn on_request(&self, _req: &RequestDescriptor) {}

    /// Called with every settled envelope, successful, cached, or failed.
    async fn on_response(&self, _req: &RequestDescriptor, _resp: &ResponseEnvelope) {}
}

/// A simple interceptor pipeline that runs hooks in order.
pub struct InterceptorPipeline {
    pub(crate) interceptors: Vec<Box<dyn Interceptor>>,
}

impl InterceptorPipeline {
    pub fn new() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }

    pub fn with<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors.push(Box::new(interceptor));
        self
    }

    pub fn push(&mut self, interceptor: Box<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run hooks around a provided async function that performs the actual call.
    pub async fn execute<F, Fut>(&self, req: &RequestDescriptor, f: F) -> ResponseEnvelope
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ResponseEnvelope>,
    {
        for ic in &self.interceptors {
            ic.on_request(req).await;
        }

        let resp = f().await;

        for ic in &self.interceptors {
            tracing::trace!(interceptor = ic.name(), success = resp.success, "on_response");
            ic.on_response(req, &resp).await;
        }
        resp
    }
}

impl Default for InterceptorPipeline {
    fn default() -> Self {
        Self::new()
    }
}
