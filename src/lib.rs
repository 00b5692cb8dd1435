//! # callguard
//!
//! Resilient call layer for JSON HTTP backends: per-endpoint circuit breaking, retries with
//! jittered backoff, coalescing of concurrent identical requests, and a response cache with
//! TTL, tags and priority-aware eviction.
//!
//! ## Overview
//!
//! Application code hands a [`RequestDescriptor`] to [`HttpExecutor::execute`] and gets a
//! [`ResponseEnvelope`] back. Between the two, the executor:
//!
//! 1. rejects the call outright when the endpoint's breaker is open,
//! 2. answers from the cache for cache-eligible GETs,
//! 3. joins an identical in-flight GET instead of issuing a new one,
//! 4. otherwise runs the retry loop over the [`transport::HttpCall`] primitive, updating the
//!    breaker, the cache and the metrics sink as it settles.
//!
//! Failures are values, not panics or `Err`s: the envelope carries a typed [`CallError`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use callguard::{HttpExecutor, RequestDescriptor};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> callguard::Result<()> {
//!     let executor = HttpExecutor::builder().config_from_env().build()?;
//!
//!     let profile = RequestDescriptor::builder("https://api.example.com/profile")
//!         .cache_ttl(Duration::from_secs(5))
//!         .tag("user")
//!         .build()?;
//!
//!     let first = executor.execute(&profile).await;
//!     let second = executor.execute(&profile).await;
//!     assert!(!first.success || second.cached);
//!
//!     // On logout
//!     executor.invalidate_tag("user");
//!     executor.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Executor, builder, request descriptors, envelopes, config |
//! | [`cache`] | TTL / tag / priority response store and background sweep |
//! | [`resilience`] | Circuit breakers, retry policy, request coalescing |
//! | [`transport`] | The `HttpCall` primitive and its reqwest implementation |
//! | [`auth`] | Authorization header and token refresh collaborators |
//! | [`metrics`] | Per-attempt metrics sinks |
//! | [`interceptors`] | Application hooks around every call |
//! | [`error_code`] | Call outcome taxonomy |

pub mod auth;
pub mod cache;
pub mod client;
pub mod error_code;
pub mod interceptors;
pub mod metrics;
pub mod resilience;
pub mod transport;

mod utils;

// Re-export main types for convenience
pub use client::{
    CallOptions, ExecutorConfig, ExecutorSignals, HttpExecutor, HttpExecutorBuilder,
    RequestDescriptor, ResponseEnvelope,
};
pub use error_code::CallError;
pub use metrics::{CallMetric, MetricsSink};
pub use transport::Method;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
