//! Resilience primitives: circuit breaking, retry policy and request coalescing.
//!
//! # Resilience Primitives Module
//!
//! These are the three registries the executor consults around every network call. Each is
//! an ordinary service instance with its own lifecycle, injected into
//! [`HttpExecutor`](crate::client::HttpExecutor) rather than reached through globals, so
//! tests get fresh state.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CircuitBreakerRegistry`] | Per-endpoint closed / open / half-open state machine |
//! | [`RetryPolicy`] | Retry decisions and jittered exponential backoff |
//! | [`RequestDeduplicator`] | Coalesces concurrent identical safe requests into one call |
//!
//! ## Circuit Breaker
//!
//! ```rust
//! use callguard::resilience::{CircuitBreakerConfig, CircuitBreakerRegistry};
//! use std::time::Duration;
//!
//! let breakers = CircuitBreakerRegistry::new(
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(5)
//!         .with_open_timeout(Duration::from_secs(60)),
//! );
//!
//! if breakers.can_proceed("api.example.com/profile") {
//!     // Make the call...
//!     breakers.record_outcome("api.example.com/profile", true);
//! }
//! ```
//!
//! ## Retry Policy
//!
//! ```rust
//! use callguard::resilience::{RetryConfig, RetryPolicy};
//! use callguard::CallError;
//!
//! let policy = RetryPolicy::new(RetryConfig::default(), 3);
//! let err = CallError::from_status(503, None, None);
//! assert!(policy.should_retry(0, &err));
//! assert!(!policy.should_retry(3, &err));
//! ```

pub mod circuit_breaker;
pub mod dedup;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerSnapshot, CircuitState,
};
pub use dedup::RequestDeduplicator;
pub use retry::{RetryConfig, RetryPolicy};
