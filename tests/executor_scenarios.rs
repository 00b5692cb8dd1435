//! End-to-end executor behavior over a scripted transport.
//!
//! Time-dependent scenarios run on paused tokio time, so backoff sleeps and breaker
//! timeouts complete instantly.

mod common;

use async_trait::async_trait;
use callguard::auth::{BearerToken, TokenRefresher};
use callguard::interceptors::Interceptor;
use callguard::metrics::InMemoryMetricsSink;
use callguard::resilience::{CircuitBreakerConfig, CircuitState};
use callguard::transport::{Method, TransportError};
use callguard::{CallError, ExecutorConfig, HttpExecutor, RequestDescriptor, ResponseEnvelope};
use common::{ScriptedTransport, Step};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PROFILE: &str = "http://api.test/profile";

fn executor(transport: &Arc<ScriptedTransport>, config: ExecutorConfig) -> HttpExecutor {
    HttpExecutor::builder()
        .config(config)
        .transport(transport.clone())
        .background_sweep(false)
        .build()
        .unwrap()
}

fn no_retries() -> ExecutorConfig {
    ExecutorConfig::default().with_max_retries(0)
}

#[tokio::test(start_paused = true)]
async fn breaker_trips_after_five_failures() {
    let transport = Arc::new(ScriptedTransport::new(Step::status(500)));
    let exec = executor(&transport, no_retries());
    let req = RequestDescriptor::get(PROFILE).unwrap();

    for _ in 0..5 {
        let out = exec.execute(&req).await;
        assert_eq!(out.error_kind(), Some("server_error"));
        assert_eq!(out.status, Some(500));
    }
    assert_eq!(transport.calls(), 5);

    let sixth = exec.execute(&req).await;
    assert!(!sixth.success);
    assert_eq!(
        sixth.error,
        Some(CallError::CircuitOpen {
            endpoint: "api.test/profile".into()
        })
    );
    assert_eq!(sixth.status, Some(503));
    assert_eq!(transport.calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn breaker_counts_settled_calls_not_attempts() {
    let transport = Arc::new(ScriptedTransport::new(Step::status(500)));
    let exec = executor(&transport, ExecutorConfig::default());
    let req = RequestDescriptor::get(PROFILE).unwrap();

    for i in 0..4 {
        let out = exec.execute(&req).await;
        assert_eq!(out.retry_count, 3);
        assert_eq!(
            exec.circuit_breakers().state("api.test/profile"),
            CircuitState::Closed,
            "still closed after {} settled failures",
            i + 1
        );
    }
    exec.execute(&req).await;
    assert_eq!(transport.calls(), 20);
    assert_eq!(
        exec.execute(&req).await.error_kind(),
        Some("circuit_open")
    );
    assert_eq!(transport.calls(), 20);
}

#[tokio::test(start_paused = true)]
async fn breaker_half_open_recovery_and_relapse() {
    let transport = Arc::new(ScriptedTransport::new(Step::status(503)));
    let exec = executor(
        &transport,
        no_retries().with_breaker(
            CircuitBreakerConfig::default().with_open_timeout(Duration::from_secs(60)),
        ),
    );
    let req = RequestDescriptor::get(PROFILE).unwrap();
    for _ in 0..5 {
        exec.execute(&req).await;
    }
    assert_eq!(exec.circuit_breakers().state("api.test/profile"), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(59)).await;
    assert_eq!(exec.execute(&req).await.error_kind(), Some("circuit_open"));
    assert_eq!(transport.calls(), 5);

    // The probe fails: straight back to open.
    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(exec.execute(&req).await.error_kind(), Some("server_error"));
    assert_eq!(transport.calls(), 6);
    assert_eq!(exec.circuit_breakers().state("api.test/profile"), CircuitState::Open);
    assert_eq!(exec.execute(&req).await.error_kind(), Some("circuit_open"));

    // Recovery: three successes close it.
    transport.set_fallback(Step::json(200, json!({"ok": true})));
    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(exec.execute(&req).await.success);
    assert_eq!(exec.circuit_breakers().state("api.test/profile"), CircuitState::HalfOpen);
    assert!(exec.execute(&req).await.success);
    assert!(exec.execute(&req).await.success);
    assert_eq!(exec.circuit_breakers().state("api.test/profile"), CircuitState::Closed);
    assert_eq!(
        exec.circuit_breakers()
            .snapshot("api.test/profile")
            .map(|s| s.failure_count),
        Some(0)
    );
}

#[tokio::test(start_paused = true)]
async fn open_breaker_does_not_touch_cache() {
    let transport = Arc::new(ScriptedTransport::new(Step::status(500)));
    let exec = executor(&transport, no_retries());
    let req = RequestDescriptor::builder(PROFILE)
        .cache_ttl(Duration::from_secs(5))
        .build()
        .unwrap();
    for _ in 0..5 {
        exec.execute(&req).await;
    }
    let before = exec.cache().stats();
    assert_eq!(exec.execute(&req).await.error_kind(), Some("circuit_open"));
    assert_eq!(exec.cache().stats(), before);
}

#[tokio::test(start_paused = true)]
async fn concurrent_identical_gets_share_one_call() {
    let transport = Arc::new(
        ScriptedTransport::ok(json!({"name": "ada"})).with_delay(Duration::from_millis(50)),
    );
    let exec = executor(&transport, ExecutorConfig::default());
    let req = RequestDescriptor::get(PROFILE).unwrap();

    let results = futures::future::join_all((0..10).map(|_| exec.execute(&req))).await;

    assert_eq!(transport.calls(), 1);
    assert!(results.iter().all(|r| r.success));
    assert!(results.iter().all(|r| r == &results[0]));
    assert_eq!(results[0].data, Some(json!({"name": "ada"})));
    assert_eq!(exec.signals().in_flight, 0);

    // Settled: the next call is a fresh one.
    exec.execute(&req).await;
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn writes_are_never_coalesced() {
    let transport = Arc::new(
        ScriptedTransport::ok(json!({"id": 1})).with_delay(Duration::from_millis(50)),
    );
    let exec = executor(&transport, ExecutorConfig::default());
    let req = RequestDescriptor::builder(PROFILE)
        .method(Method::Post)
        .body(json!({"name": "ada"}))
        .build()
        .unwrap();

    let results = futures::future::join_all((0..3).map(|_| exec.execute(&req))).await;
    assert!(results.iter().all(|r| r.success));
    assert_eq!(transport.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn dedup_can_be_disabled() {
    let transport =
        Arc::new(ScriptedTransport::ok(json!(1)).with_delay(Duration::from_millis(50)));
    let exec = executor(&transport, ExecutorConfig::default().with_dedup(false));
    let req = RequestDescriptor::get(PROFILE).unwrap();
    futures::future::join_all((0..4).map(|_| exec.execute(&req))).await;
    assert_eq!(transport.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn three_503s_then_success_reports_retry_count() {
    let transport = Arc::new(
        ScriptedTransport::ok(json!({"done": true}))
            .then(Step::status(503))
            .then(Step::status(503))
            .then(Step::status(503)),
    );
    let exec = executor(&transport, ExecutorConfig::default());
    let out = exec.execute(&RequestDescriptor::get(PROFILE).unwrap()).await;

    assert!(out.success);
    assert_eq!(out.retry_count, 3);
    assert_eq!(out.status, Some(200));
    assert_eq!(out.data, Some(json!({"done": true})));
    assert_eq!(transport.calls(), 4);
    // Backoff 1s + 2s + 4s, each within +/-25%.
    assert!(out.duration_ms >= 5_000, "duration {}", out.duration_ms);
    assert!(out.duration_ms <= 9_000, "duration {}", out.duration_ms);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_return_last_error() {
    let transport = Arc::new(
        ScriptedTransport::new(Step::json(502, json!({"message": "bad gateway"})))
            .then(Step::Fail(TransportError::Connect("refused".into()))),
    );
    let exec = executor(&transport, ExecutorConfig::default());
    let req = RequestDescriptor::builder(PROFILE).retries(2).build().unwrap();
    let out = exec.execute(&req).await;

    assert!(!out.success);
    assert_eq!(out.retry_count, 2);
    assert_eq!(transport.calls(), 3);
    assert_eq!(
        out.error,
        Some(CallError::Server {
            status: 502,
            message: Some("bad gateway".into())
        })
    );
}

#[tokio::test(start_paused = true)]
async fn client_errors_are_not_retried_and_keep_breaker_closed() {
    let transport = Arc::new(ScriptedTransport::new(Step::json(
        400,
        json!({"error": {"message": "name is required"}}),
    )));
    let exec = executor(&transport, ExecutorConfig::default());
    let req = RequestDescriptor::get(PROFILE).unwrap();

    for _ in 0..6 {
        let out = exec.execute(&req).await;
        assert_eq!(out.retry_count, 0);
        assert_eq!(
            out.error,
            Some(CallError::Client {
                status: 400,
                message: Some("name is required".into())
            })
        );
    }
    assert_eq!(transport.calls(), 6);
    assert_eq!(exec.circuit_breakers().state("api.test/profile"), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_honors_retry_after() {
    let limited = callguard::transport::WireResponse::new(429, "").with_header("Retry-After", "10");
    let transport = Arc::new(
        ScriptedTransport::ok(json!({})).then(Step::Respond(limited)),
    );
    let exec = executor(&transport, ExecutorConfig::default());
    let out = exec.execute(&RequestDescriptor::get(PROFILE).unwrap()).await;
    assert!(out.success);
    assert_eq!(out.retry_count, 1);
    assert!(out.duration_ms >= 10_000, "duration {}", out.duration_ms);
}

#[tokio::test(start_paused = true)]
async fn attempts_time_out() {
    let transport = Arc::new(ScriptedTransport::new(Step::Hang));
    let metrics = Arc::new(InMemoryMetricsSink::new(16));
    let exec = HttpExecutor::builder()
        .config(no_retries())
        .transport(transport.clone())
        .metrics_sink(metrics.clone())
        .background_sweep(false)
        .build()
        .unwrap();
    let req = RequestDescriptor::builder(PROFILE)
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    let out = exec.execute(&req).await;
    assert_eq!(out.error, Some(CallError::Timeout { after_ms: 100 }));
    assert_eq!(out.status, None);
    let recorded = metrics.metrics();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].status, None);
    assert!((100..200).contains(&recorded[0].duration_ms));
}

#[tokio::test(start_paused = true)]
async fn cached_profile_is_served_without_network() {
    let transport = Arc::new(ScriptedTransport::ok(json!({"name": "ada"})));
    let exec = executor(&transport, ExecutorConfig::default());
    let req: RequestDescriptor = RequestDescriptor::from_options(
        PROFILE,
        serde_json::from_value(json!({"cache": true, "cacheTtl": 5000})).unwrap(),
    )
    .unwrap();

    let first = exec.execute(&req).await;
    assert!(first.success && !first.cached);

    tokio::time::advance(Duration::from_millis(4_000)).await;
    let second = exec.execute(&req).await;
    assert!(second.cached);
    assert_eq!(second.data, first.data);
    assert_eq!(transport.calls(), 1);

    tokio::time::advance(Duration::from_millis(1_001)).await;
    let third = exec.execute(&req).await;
    assert!(!third.cached);
    assert_eq!(transport.calls(), 2);
    assert_eq!(exec.signals().cache.hits, 1);
}

#[tokio::test(start_paused = true)]
async fn failures_and_writes_are_not_cached() {
    let transport = Arc::new(ScriptedTransport::ok(json!({"v": 2})).then(Step::status(404)));
    let exec = executor(&transport, ExecutorConfig::default());
    let get = RequestDescriptor::builder(PROFILE).cache(true).build().unwrap();
    assert!(!exec.execute(&get).await.success);
    assert!(!exec.execute(&get).await.cached);

    let post = RequestDescriptor::builder(PROFILE)
        .method(Method::Post)
        .cache(true)
        .build()
        .unwrap();
    exec.execute(&post).await;
    assert!(!exec.execute(&post).await.cached);
    assert_eq!(transport.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn tag_invalidation_drops_only_tagged_responses() {
    let transport = Arc::new(ScriptedTransport::ok(json!({"v": 1})));
    let exec = executor(&transport, ExecutorConfig::default());
    let profile = RequestDescriptor::builder(PROFILE)
        .cache(true)
        .tag("user")
        .build()
        .unwrap();
    let catalog = RequestDescriptor::builder("http://api.test/catalog")
        .cache(true)
        .tag("public")
        .build()
        .unwrap();
    exec.execute(&profile).await;
    exec.execute(&catalog).await;
    assert_eq!(transport.calls(), 2);

    assert_eq!(exec.invalidate_tag("user"), 1);
    assert!(!exec.execute(&profile).await.cached);
    assert!(exec.execute(&catalog).await.cached);
    assert_eq!(transport.calls(), 3);
}

#[derive(Default)]
struct CountingRefresher {
    token: Option<Arc<BearerToken>>,
    refreshes: AtomicUsize,
    expired: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl TokenRefresher for CountingRefresher {
    async fn refresh(&self) -> Result<(), String> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err("refresh token revoked".into());
        }
        if let Some(t) = &self.token {
            t.set("fresh");
        }
        Ok(())
    }

    async fn session_expired(&self) {
        self.expired.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn unauthorized_refreshes_once_and_retries() {
    let transport =
        Arc::new(ScriptedTransport::ok(json!({"name": "ada"})).then(Step::status(401)));
    let token = Arc::new(BearerToken::new("stale"));
    let refresher = Arc::new(CountingRefresher {
        token: Some(token.clone()),
        ..Default::default()
    });
    let exec = HttpExecutor::builder()
        .transport(transport.clone())
        .auth_provider(token)
        .token_refresher(refresher.clone())
        .background_sweep(false)
        .build()
        .unwrap();

    let out = exec.execute(&RequestDescriptor::get(PROFILE).unwrap()).await;
    assert!(out.success);
    assert_eq!(out.retry_count, 0);
    assert_eq!(refresher.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(refresher.expired.load(Ordering::SeqCst), 0);

    let reqs = transport.requests();
    assert_eq!(reqs.len(), 2);
    assert_eq!(reqs[0].header("authorization"), Some("Bearer stale"));
    assert_eq!(reqs[1].header("authorization"), Some("Bearer fresh"));
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_signals_reauthentication() {
    let transport = Arc::new(ScriptedTransport::new(Step::status(401)));
    let refresher = Arc::new(CountingRefresher {
        fail: true,
        ..Default::default()
    });
    let exec = HttpExecutor::builder()
        .transport(transport.clone())
        .token_refresher(refresher.clone())
        .background_sweep(false)
        .build()
        .unwrap();

    let out = exec.execute(&RequestDescriptor::get(PROFILE).unwrap()).await;
    assert_eq!(
        out.error,
        Some(CallError::AuthenticationRequired {
            message: "refresh token revoked".into()
        })
    );
    assert_eq!(out.status, Some(401));
    assert_eq!(transport.calls(), 1);
    assert_eq!(refresher.expired.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn unauthorized_without_refresher_is_a_client_error() {
    let transport = Arc::new(ScriptedTransport::new(Step::status(401)));
    let exec = executor(&transport, ExecutorConfig::default());
    let out = exec.execute(&RequestDescriptor::get(PROFILE).unwrap()).await;
    assert_eq!(out.error_kind(), Some("client_error"));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn every_attempt_reports_a_metric() {
    let transport = Arc::new(
        ScriptedTransport::ok(json!({}))
            .then(Step::status(503))
            .then(Step::Fail(TransportError::Connect("reset".into()))),
    );
    let metrics = Arc::new(InMemoryMetricsSink::new(16));
    let exec = HttpExecutor::builder()
        .transport(transport.clone())
        .metrics_sink(metrics.clone())
        .background_sweep(false)
        .build()
        .unwrap();

    let out = exec.execute(&RequestDescriptor::get(PROFILE).unwrap()).await;
    assert!(out.success);
    assert_eq!(out.retry_count, 2);

    let recorded = metrics.for_endpoint("api.test/profile");
    let statuses: Vec<_> = recorded.iter().map(|m| m.status).collect();
    let attempts: Vec<_> = recorded.iter().map(|m| m.attempt).collect();
    assert_eq!(statuses, vec![Some(503), None, Some(200)]);
    assert_eq!(attempts, vec![0, 1, 2]);
    assert!(recorded.iter().all(|m| m.method == Method::Get));
}

#[tokio::test(start_paused = true)]
async fn attempts_carry_distinct_request_ids() {
    let transport = Arc::new(ScriptedTransport::ok(json!({})).then(Step::status(500)));
    let exec = executor(&transport, ExecutorConfig::default());
    exec.execute(&RequestDescriptor::get(PROFILE).unwrap()).await;

    let ids: Vec<String> = transport
        .requests()
        .iter()
        .map(|r| r.header("x-request-id").unwrap_or_default().to_string())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(!ids[0].is_empty());
    assert_ne!(ids[0], ids[1]);
}

struct Outcomes(Arc<Mutex<Vec<String>>>);

#[async_trait]
impl Interceptor for Outcomes {
    async fn on_response(&self, _req: &RequestDescriptor, resp: &ResponseEnvelope) {
        let label = match (&resp.error, resp.cached) {
            (Some(e), _) => e.kind().to_string(),
            (None, true) => "cached".to_string(),
            (None, false) => "network".to_string(),
        };
        self.0.lock().unwrap().push(label);
    }
}

#[tokio::test(start_paused = true)]
async fn interceptors_observe_fast_paths() {
    let transport = Arc::new(
        ScriptedTransport::new(Step::status(500)).then(Step::json(200, json!({"v": 1}))),
    );
    let log = Arc::new(Mutex::new(Vec::new()));
    let exec = HttpExecutor::builder()
        .config(no_retries().with_breaker(CircuitBreakerConfig::default().with_failure_threshold(1)))
        .transport(transport.clone())
        .interceptor(Outcomes(log.clone()))
        .background_sweep(false)
        .build()
        .unwrap();

    let cached = RequestDescriptor::builder(PROFILE).cache(true).build().unwrap();
    exec.execute(&cached).await;
    exec.execute(&cached).await;
    let other = RequestDescriptor::get("http://api.test/feed").unwrap();
    exec.execute(&other).await;
    exec.execute(&other).await;

    assert_eq!(
        *log.lock().unwrap(),
        vec!["network", "cached", "server_error", "circuit_open"]
    );
}

#[tokio::test(start_paused = true)]
async fn signals_reset_and_close() {
    let transport = Arc::new(ScriptedTransport::new(Step::status(500)));
    let exec = HttpExecutor::builder()
        .config(no_retries())
        .transport(transport.clone())
        .build()
        .unwrap();
    assert!(exec.is_sweeping());

    for _ in 0..5 {
        exec.execute(&RequestDescriptor::get(PROFILE).unwrap()).await;
    }
    let signals = exec.signals();
    assert_eq!(signals.degraded_endpoints(), vec!["api.test/profile"]);
    assert_eq!(signals.breakers[0].failure_count, 5);

    exec.reset();
    assert!(exec.signals().breakers.is_empty());
    assert!(!exec.execute(&RequestDescriptor::get(PROFILE).unwrap()).await.cached);
    assert_eq!(transport.calls(), 6);

    exec.close();
    assert!(!exec.is_sweeping());
    assert_eq!(exec.signals().cache.total_items, 0);
}
