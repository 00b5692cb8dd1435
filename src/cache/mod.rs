//! Response caching: TTL, tag invalidation and priority-aware LRU eviction.
//!
//! # Response Cache Module
//!
//! Successful, cache-eligible GET responses are kept in a [`CacheStore`] so repeated calls
//! within their TTL never reach the network.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheStore`] | The store: `get`, `set`, `delete`, `invalidate_by_tag`, `stats` |
//! | [`CacheConfig`] | Capacity (`max_items`, `max_bytes`), default TTL, compression, sweep period |
//! | [`CacheOptions`] | Per-write TTL, [`CachePriority`] and tags |
//! | [`CacheSweeper`] | Background task that purges expired entries |
//! | [`request_signature`] | Canonical request hash used as cache and dedup key |
//!
//! ## Eviction
//!
//! A write that would exceed `max_items` or `max_bytes` first drops expired entries, then
//! evicts the least-recently-used entry that is not [`CachePriority::High`]. High-priority
//! entries go only when nothing lower is left.
//!
//! ```rust
//! use callguard::cache::{CacheConfig, CacheOptions, CachePriority, CacheStore};
//! use std::time::Duration;
//!
//! let cache = CacheStore::new(CacheConfig::new().with_max_items(100));
//! cache.set(
//!     "profile",
//!     &serde_json::json!({"name": "ada"}),
//!     CacheOptions::new()
//!         .with_ttl(Duration::from_secs(60))
//!         .with_priority(CachePriority::High)
//!         .with_tag("user"),
//! ).unwrap();
//!
//! assert!(cache.get::<serde_json::Value>("profile").is_some());
//! assert_eq!(cache.invalidate_by_tag("user"), 1);
//! ```

mod codec;
mod key;
mod store;
mod sweeper;

pub use key::{endpoint_key, request_signature};
pub use store::{CacheConfig, CacheEntryMeta, CacheOptions, CachePriority, CacheStats, CacheStore};
pub use sweeper::CacheSweeper;
