use std::sync::{Arc, Mutex};

use super::config::ExecutorConfig;
use super::executor::{ExecutorCore, HttpExecutor};
use crate::auth::{AuthHeaderProvider, TokenRefresher};
use crate::cache::{CacheStore, CacheSweeper};
use crate::interceptors::{Interceptor, InterceptorPipeline};
use crate::metrics::MetricsSink;
use crate::resilience::{CircuitBreakerRegistry, RequestDeduplicator};
use crate::transport::{HttpCall, HttpTransport};
use crate::Result;

/// Builder for [`HttpExecutor`].
///
/// Every registry and collaborator can be injected; whatever is not injected is created
/// fresh from the [`ExecutorConfig`]. Injecting a registry lets several executors share it.
pub struct HttpExecutorBuilder {
    config: ExecutorConfig,
    transport: Option<Arc<dyn HttpCall>>,
    cache: Option<Arc<CacheStore>>,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
    dedup: Option<Arc<RequestDeduplicator>>,
    metrics: Arc<dyn MetricsSink>,
    auth: Arc<dyn AuthHeaderProvider>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    interceptors: InterceptorPipeline,
    background_sweep: bool,
}

impl HttpExecutorBuilder {
    pub fn new() -> Self {
        Self {
            config: ExecutorConfig::default(),
            transport: None,
            cache: None,
            breakers: None,
            dedup: None,
            metrics: crate::metrics::noop_sink(),
            auth: crate::auth::no_auth(),
            refresher: None,
            interceptors: InterceptorPipeline::new(),
            background_sweep: true,
        }
    }

    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `CALLGUARD_*` environment overrides on top of the current config.
    pub fn config_from_env(mut self) -> Self {
        self.config = self.config.overlay_env();
        self
    }

    /// Inject the call primitive. Default is a reqwest [`HttpTransport`] tuned from env.
    pub fn transport(mut self, transport: Arc<dyn HttpCall>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn cache_store(mut self, cache: Arc<CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn circuit_breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    pub fn deduplicator(mut self, dedup: Arc<RequestDeduplicator>) -> Self {
        self.dedup = Some(dedup);
        self
    }

    /// Inject a metrics sink. Default is a no-op sink.
    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    pub fn auth_provider(mut self, auth: Arc<dyn AuthHeaderProvider>) -> Self {
        self.auth = auth;
        self
    }

    /// Without a refresher, a 401 is surfaced as a plain client error.
    pub fn token_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn interceptor<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors = self.interceptors.with(interceptor);
        self
    }

    /// Disable the periodic cache sweep (expired entries are then only dropped lazily).
    pub fn background_sweep(mut self, enable: bool) -> Self {
        self.background_sweep = enable;
        self
    }

    /// Validate the configuration and assemble the executor.
    ///
    /// The cache sweeper is spawned onto the current tokio runtime when one is running.
    pub fn build(self) -> Result<HttpExecutor> {
        self.config.validate()?;

        let transport = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::from_env()?),
        };
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(CacheStore::new(self.config.cache.clone())));
        let breakers = self
            .breakers
            .unwrap_or_else(|| Arc::new(CircuitBreakerRegistry::new(self.config.breaker.clone())));
        let dedup = self
            .dedup
            .unwrap_or_else(|| Arc::new(RequestDeduplicator::new()));

        let sweeper = if self.background_sweep && cache.config().enabled {
            CacheSweeper::spawn(&cache, cache.config().sweep_interval)
        } else {
            None
        };

        let core = ExecutorCore {
            config: self.config,
            transport,
            cache,
            breakers,
            dedup,
            metrics: self.metrics,
            auth: self.auth,
            refresher: self.refresher,
        };

        Ok(HttpExecutor {
            core: Arc::new(core),
            interceptors: self.interceptors,
            sweeper: Mutex::new(sweeper),
        })
    }
}

impl Default for HttpExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
