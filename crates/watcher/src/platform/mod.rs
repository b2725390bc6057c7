//! OS change notification
//!
//! The coordinator only needs "these paths changed" batches. [`ChangeNotifier`]
//! is that seam; [`NotifyBackend`] implements it with the `notify` crate
//! (FSEvents on macOS, inotify on Linux).

use crate::error::WatchError;
use notify::{EventKind, RecursiveMode, Watcher as _};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// A directory to subscribe to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRoot {
    pub path: PathBuf,
    pub recursive: bool,
}

/// Live OS subscription; dropping it stops delivery
pub struct Subscription {
    _guard: Box<dyn Send>,
}

impl Subscription {
    pub fn new<G: Send + 'static>(guard: G) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Source of coalesced, best-effort change signals
pub trait ChangeNotifier: Send + Sync {
    /// Start delivering changed-path batches for `roots` on `tx`
    fn subscribe(
        &self,
        roots: &[WatchRoot],
        tx: mpsc::UnboundedSender<Vec<PathBuf>>,
    ) -> Result<Subscription, WatchError>;
}

/// [`ChangeNotifier`] backed by `notify::RecommendedWatcher`
#[derive(Debug, Default, Clone)]
pub struct NotifyBackend;

impl ChangeNotifier for NotifyBackend {
    fn subscribe(
        &self,
        roots: &[WatchRoot],
        tx: mpsc::UnboundedSender<Vec<PathBuf>>,
    ) -> Result<Subscription, WatchError> {
        // notify calls back on its own thread; an unbounded send never blocks it
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Access(_)) || event.paths.is_empty() {
                        return;
                    }
                    trace!(kind = ?event.kind, paths = event.paths.len(), "raw event");
                    let _ = tx.send(event.paths);
                }
                Err(e) => warn!(error = %e, "notify error"),
            }
        })?;

        for root in roots {
            let mode = if root.recursive {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            if let Err(e) = watcher.watch(&root.path, mode) {
                warn!(path = %root.path.display(), error = %e, "Failed to watch path, skipping");
            }
        }

        Ok(Subscription::new(watcher))
    }
}
