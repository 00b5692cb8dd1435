//! Background expiry sweep.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use super::CacheStore;

/// Periodically purges expired entries from a [`CacheStore`].
///
/// Holds only a weak reference, so the task ends on its own once the store is dropped.
/// Stopped explicitly with [`CacheSweeper::stop`] or on drop.
pub struct CacheSweeper {
    handle: Option<JoinHandle<()>>,
}

impl CacheSweeper {
    /// Spawn onto the current tokio runtime. Returns `None` outside a runtime.
    pub fn spawn(store: &Arc<CacheStore>, every: Duration) -> Option<Self> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let weak: Weak<CacheStore> = Arc::downgrade(store);
        let every = every.max(Duration::from_millis(10));
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else {
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged, "cache sweep removed expired entries");
                }
            }
        });
        Some(Self {
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
