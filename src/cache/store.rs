//! In-memory response store with TTL, tags and priority-aware LRU eviction.

use lru::LruCache;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::codec::PayloadCodec;
use crate::utils::{duration_ms, opt_duration_ms};
use crate::Result;

/// Eviction tier. `High` entries are only evicted once nothing lower is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePriority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_items: usize,
    pub max_bytes: usize,
    /// Applied when a `set` does not carry its own TTL. `None` means entries never age out.
    #[serde(with = "opt_duration_ms")]
    pub default_ttl: Option<Duration>,
    /// Encoded payloads at or above this size are deflated. `None` disables compression.
    pub compression_threshold: Option<usize>,
    /// Period of the background expiry sweep.
    #[serde(with = "duration_ms")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_items: 500,
            max_bytes: 10 * 1024 * 1024,
            default_ttl: None,
            compression_threshold: Some(1024),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
    pub fn with_max_items(mut self, n: usize) -> Self {
        self.max_items = n;
        self
    }
    pub fn with_max_bytes(mut self, n: usize) -> Self {
        self.max_bytes = n;
        self
    }
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }
    pub fn with_compression_threshold(mut self, threshold: Option<usize>) -> Self {
        self.compression_threshold = threshold;
        self
    }
    pub fn with_sweep_interval(mut self, every: Duration) -> Self {
        self.sweep_interval = every;
        self
    }
}

/// Per-write options.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    pub ttl: Option<Duration>,
    pub priority: CachePriority,
    pub tags: BTreeSet<String>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
    pub fn with_priority(mut self, priority: CachePriority) -> Self {
        self.priority = priority;
        self
    }
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Vec<u8>,
    compressed: bool,
    created_at: Instant,
    ttl: Option<Duration>,
    priority: CachePriority,
    tags: BTreeSet<String>,
    access_count: u64,
    last_accessed_at: Instant,
    size_bytes: usize,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(self.created_at) > ttl,
            None => false,
        }
    }
}

/// Read-only view of an entry's bookkeeping, without the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntryMeta {
    pub key: String,
    pub priority: CachePriority,
    pub tags: BTreeSet<String>,
    pub ttl: Option<Duration>,
    pub age: Duration,
    pub access_count: u64,
    pub size_bytes: usize,
    pub compressed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub total_items: usize,
    pub total_bytes: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl AtomicStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

struct Inner {
    // Iteration order is most- to least-recently used.
    entries: LruCache<String, CacheEntry>,
    by_tag: HashMap<String, HashSet<String>>,
    total_bytes: usize,
}

impl Inner {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        for tag in &entry.tags {
            if let Some(keys) = self.by_tag.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
        Some(entry)
    }

    fn insert(&mut self, key: String, entry: CacheEntry) {
        for tag in &entry.tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
        self.total_bytes += entry.size_bytes;
        self.entries.put(key, entry);
    }

    fn expired_keys(&self, now: Instant) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Least-recently-used entry below `High`, else the least-recently-used overall.
    fn eviction_victim(&self) -> Option<String> {
        self.entries
            .iter()
            .rev()
            .find(|(_, e)| e.priority != CachePriority::High)
            .or_else(|| self.entries.peek_lru())
            .map(|(k, _)| k.clone())
    }
}

/// TTL + priority + tag-indexed response store.
///
/// All mutations happen under one short, synchronous lock that is never held across an
/// await point. A poisoned lock degrades to "cache miss" rather than a panic.
pub struct CacheStore {
    config: CacheConfig,
    codec: PayloadCodec,
    inner: Mutex<Inner>,
    stats: AtomicStats,
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            codec: PayloadCodec::new(config.compression_threshold),
            config,
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                by_tag: HashMap::new(),
                total_bytes: 0,
            }),
            stats: AtomicStats::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> Option<MutexGuard<'_, Inner>> {
        match self.inner.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!("cache store lock poisoned; treating access as a miss");
                None
            }
        }
    }

    /// Fetch and decode a fresh value. Expired or undecodable entries are dropped and
    /// reported as misses.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.config.enabled {
            return None;
        }
        let now = Instant::now();
        let Some(mut inner) = self.lock() else {
            AtomicStats::bump(&self.stats.misses, 1);
            return None;
        };

        let expired = match inner.entries.peek(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                AtomicStats::bump(&self.stats.misses, 1);
                return None;
            }
        };
        if expired {
            inner.remove(key);
            AtomicStats::bump(&self.stats.misses, 1);
            AtomicStats::bump(&self.stats.expirations, 1);
            return None;
        }

        let decoded = match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.access_count += 1;
                entry.last_accessed_at = now;
                self.codec.decode::<T>(&entry.payload, entry.compressed)
            }
            None => {
                AtomicStats::bump(&self.stats.misses, 1);
                return None;
            }
        };

        match decoded {
            Ok(value) => {
                AtomicStats::bump(&self.stats.hits, 1);
                Some(value)
            }
            Err(e) => {
                debug!(key, error = %e, "dropping undecodable cache entry");
                inner.remove(key);
                AtomicStats::bump(&self.stats.misses, 1);
                None
            }
        }
    }

    /// Store a value, evicting as needed. Returns `Ok(false)` when the store is disabled or
    /// the entry alone exceeds `max_bytes`; in the latter case any older value under `key`
    /// is dropped.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: CacheOptions,
    ) -> Result<bool> {
        if !self.config.enabled {
            return Ok(false);
        }
        let encoded = self.codec.encode(value)?;
        let size_bytes = encoded.bytes.len() + key.len();
        if size_bytes > self.config.max_bytes {
            debug!(key, size_bytes, "cache entry larger than max_bytes; not stored");
            // The previous value for this key is stale now.
            if let Some(mut inner) = self.lock() {
                inner.remove(key);
            }
            return Ok(false);
        }

        let now = Instant::now();
        let entry = CacheEntry {
            payload: encoded.bytes,
            compressed: encoded.compressed,
            created_at: now,
            ttl: options.ttl.or(self.config.default_ttl),
            priority: options.priority,
            tags: options.tags,
            access_count: 0,
            last_accessed_at: now,
            size_bytes,
        };

        let Some(mut inner) = self.lock() else {
            return Ok(false);
        };
        // Last writer wins.
        inner.remove(key);
        self.make_room(&mut inner, size_bytes, now);
        inner.insert(key.to_string(), entry);
        AtomicStats::bump(&self.stats.sets, 1);
        Ok(true)
    }

    fn would_overflow(&self, inner: &Inner, incoming: usize) -> bool {
        inner.entries.len() + 1 > self.config.max_items
            || inner.total_bytes + incoming > self.config.max_bytes
    }

    fn make_room(&self, inner: &mut Inner, incoming: usize, now: Instant) {
        if !self.would_overflow(inner, incoming) {
            return;
        }
        let expired = inner.expired_keys(now);
        for key in &expired {
            inner.remove(key);
        }
        AtomicStats::bump(&self.stats.expirations, expired.len() as u64);

        let mut evicted = 0u64;
        while self.would_overflow(inner, incoming) {
            let Some(victim) = inner.eviction_victim() else {
                break;
            };
            if let Some(entry) = inner.remove(&victim) {
                debug!(key = %victim, priority = ?entry.priority, "evicted cache entry");
                evicted += 1;
            }
        }
        AtomicStats::bump(&self.stats.evictions, evicted);
    }

    pub fn delete(&self, key: &str) -> bool {
        self.lock()
            .map(|mut inner| inner.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Whether a fresh entry exists. Does not count as a hit or touch recency.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.lock()
            .and_then(|inner| inner.entries.peek(key).map(|e| !e.is_expired(now)))
            .unwrap_or(false)
    }

    /// Remove every entry carrying `tag`; returns how many were removed.
    pub fn invalidate_by_tag(&self, tag: &str) -> usize {
        let Some(mut inner) = self.lock() else {
            return 0;
        };
        let keys = inner.by_tag.remove(tag).unwrap_or_default();
        let mut removed = 0;
        for key in keys {
            if inner.remove(&key).is_some() {
                removed += 1;
            }
        }
        debug!(tag, removed, "invalidated cache entries by tag");
        removed
    }

    /// Drop entries whose TTL has elapsed; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let Some(mut inner) = self.lock() else {
            return 0;
        };
        let expired = inner.expired_keys(now);
        for key in &expired {
            inner.remove(key);
        }
        AtomicStats::bump(&self.stats.expirations, expired.len() as u64);
        expired.len()
    }

    pub fn clear(&self) {
        if let Some(mut inner) = self.lock() {
            inner.entries.clear();
            inner.by_tag.clear();
            inner.total_bytes = 0;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entry_meta(&self, key: &str) -> Option<CacheEntryMeta> {
        let now = Instant::now();
        let inner = self.lock()?;
        let e = inner.entries.peek(key)?;
        Some(CacheEntryMeta {
            key: key.to_string(),
            priority: e.priority,
            tags: e.tags.clone(),
            ttl: e.ttl,
            age: now.saturating_duration_since(e.created_at),
            access_count: e.access_count,
            size_bytes: e.size_bytes,
            compressed: e.compressed,
        })
    }

    pub fn stats(&self) -> CacheStats {
        let (total_items, total_bytes) = self
            .lock()
            .map(|inner| (inner.entries.len(), inner.total_bytes))
            .unwrap_or((0, 0));
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            sets: self.stats.sets.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            expirations: self.stats.expirations.load(Ordering::Relaxed),
            total_items,
            total_bytes,
        }
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
