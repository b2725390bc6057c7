//! Per-watcher debouncing
//!
//! Each watcher has at most one pending single-shot timer. Signalling again
//! replaces it, so a burst of notifications produces exactly one expiry once
//! the burst has been quiet for the watcher's window.

use dashmap::DashMap;
use settle_core::WatcherId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

struct Pending {
    generation: u64,
    abort: Option<AbortHandle>,
}

/// Restartable single-shot timers keyed by watcher
pub struct DebounceScheduler {
    pending: Arc<DashMap<WatcherId, Pending>>,
    generation: AtomicU64,
    expired_tx: mpsc::UnboundedSender<WatcherId>,
}

impl DebounceScheduler {
    /// Create a scheduler and the channel its expiries are delivered on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WatcherId>) {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            pending: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
            expired_tx,
        };
        (scheduler, expired_rx)
    }

    /// (Re)start the timer for `id`
    ///
    /// Must be called from within a tokio runtime.
    pub fn signal(&self, id: WatcherId, window: Duration) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        // Register first so a zero-length window cannot fire before the
        // entry it has to match exists
        if let Some(previous) = self.pending.insert(
            id,
            Pending {
                generation,
                abort: None,
            },
        ) {
            if let Some(abort) = previous.abort {
                abort.abort();
            }
        }

        let pending = Arc::clone(&self.pending);
        let expired_tx = self.expired_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            // A timer that lost a race with its replacement must not fire
            if pending
                .remove_if(&id, |_, p| p.generation == generation)
                .is_some()
            {
                let _ = expired_tx.send(id);
            }
        });

        if let Some(mut entry) = self.pending.get_mut(&id) {
            if entry.generation == generation {
                entry.abort = Some(handle.abort_handle());
            }
        }
    }

    /// Drop any pending timer for `id`
    pub fn cancel(&self, id: &WatcherId) -> bool {
        match self.pending.remove(id) {
            Some((_, pending)) => {
                if let Some(abort) = pending.abort {
                    abort.abort();
                }
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, id: &WatcherId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
