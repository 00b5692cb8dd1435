//! Request coalescing.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{trace, warn};

use crate::client::ResponseEnvelope;
use crate::error_code::CallError;

type SharedOutcome = Shared<BoxFuture<'static, ResponseEnvelope>>;
type PendingMap = Arc<Mutex<HashMap<String, Pending>>>;

// Every critical section is a single map operation, so a poisoned map is still consistent.
fn lock_map(m: &Mutex<HashMap<String, Pending>>) -> MutexGuard<'_, HashMap<String, Pending>> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Pending {
    id: u64,
    outcome: SharedOutcome,
    /// Callers currently awaiting `outcome`.
    waiters: usize,
}

/// Detaches one waiter when its `join` future finishes or is dropped.
struct Attached<'a> {
    pending: &'a Mutex<HashMap<String, Pending>>,
    signature: &'a str,
    id: u64,
}

impl Drop for Attached<'_> {
    fn drop(&mut self) {
        let mut map = lock_map(self.pending);
        if let Some(p) = map.get_mut(self.signature) {
            if p.id == self.id {
                p.waiters = p.waiters.saturating_sub(1);
            }
        }
    }
}

/// Maps a request signature to the single outstanding call for it.
///
/// The first caller's starter future is spawned onto the runtime, so the call completes
/// even if every waiter loses interest. The map entry is removed by that task *before* the
/// outcome becomes visible, so a waiter that immediately re-issues the same request starts
/// a fresh call instead of joining a settled one.
pub struct RequestDeduplicator {
    pending: PendingMap,
    next_id: AtomicU64,
    joins: AtomicU64,
}

impl RequestDeduplicator {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            joins: AtomicU64::new(0),
        }
    }

    /// Join the in-flight call for `signature`, or start one with `starter`.
    pub async fn join<F, Fut>(&self, signature: &str, starter: F) -> ResponseEnvelope
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = ResponseEnvelope> + Send + 'static,
    {
        let (id, outcome) = {
            let mut map = lock_map(&self.pending);

            if let Some(p) = map.get_mut(signature) {
                p.waiters += 1;
                self.joins.fetch_add(1, Ordering::Relaxed);
                trace!(signature, waiters = p.waiters, "joined in-flight request");
                (p.id, p.outcome.clone())
            } else {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let outcome = Self::spawn_settling(
                    Arc::clone(&self.pending),
                    signature.to_string(),
                    id,
                    starter(),
                );
                map.insert(
                    signature.to_string(),
                    Pending {
                        id,
                        outcome: outcome.clone(),
                        waiters: 1,
                    },
                );
                (id, outcome)
            }
        };
        let _attached = Attached {
            pending: &self.pending,
            signature,
            id,
        };
        outcome.await
    }

    fn spawn_settling<Fut>(pending: PendingMap, signature: String, id: u64, fut: Fut) -> SharedOutcome
    where
        Fut: Future<Output = ResponseEnvelope> + Send + 'static,
    {
        let task_pending = Arc::clone(&pending);
        let task_signature = signature.clone();
        // The spawned task blocks on the map lock until the caller has inserted the entry.
        let handle = tokio::spawn(async move {
            let out = fut.await;
            Self::settle(&task_pending, &task_signature, id);
            out
        });

        async move {
            match handle.await {
                Ok(envelope) => envelope,
                Err(e) => {
                    Self::settle(&pending, &signature, id);
                    warn!(signature = %signature, error = %e, "coalesced request task failed");
                    ResponseEnvelope::failure(
                        CallError::Internal {
                            message: format!("request task failed: {}", e),
                        },
                        0,
                    )
                }
            }
        }
        .boxed()
        .shared()
    }

    fn settle(pending: &Mutex<HashMap<String, Pending>>, signature: &str, id: u64) {
        let mut map = lock_map(pending);
        if map.get(signature).map(|p| p.id == id).unwrap_or(false) {
            map.remove(signature);
        }
    }

    /// Number of distinct signatures currently in flight.
    pub fn in_flight(&self) -> usize {
        lock_map(&self.pending).len()
    }

    /// Callers still awaiting the in-flight call for `signature`, including its originator.
    /// Drops to zero when every caller has gone, while the call itself keeps running.
    pub fn waiters(&self, signature: &str) -> Option<usize> {
        lock_map(&self.pending).get(signature).map(|p| p.waiters)
    }

    /// Total joins (callers that did not start their own call) since creation.
    pub fn total_joins(&self) -> u64 {
        self.joins.load(Ordering::Relaxed)
    }

    /// Forget all in-flight entries. Running calls still complete for their current waiters.
    pub fn clear(&self) {
        lock_map(&self.pending).clear();
    }
}

impl Default for RequestDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}
