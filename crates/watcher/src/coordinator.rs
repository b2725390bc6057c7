//! Notification coordinator
//!
//! Holds the single OS subscription for all enabled watchers and routes each
//! coalesced batch of changed paths to the watchers whose directory contains
//! them. The subscription is rebuilt from scratch whenever the watcher set
//! changes; there is no incremental patching.

use crate::error::WatchError;
use crate::platform::{ChangeNotifier, Subscription, WatchRoot};
use parking_lot::Mutex;
use settle_core::WatcherId;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Resolved directory of one enabled watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRoute {
    pub watcher_id: WatcherId,
    pub path: PathBuf,
    pub recursive: bool,
}

/// Receiver of per-watcher change signals
pub trait NotifySink: Send + Sync {
    fn notify(&self, id: WatcherId);
}

struct Active {
    _subscription: Subscription,
    drain: JoinHandle<()>,
    routes: Arc<Vec<WatchRoute>>,
}

impl Drop for Active {
    fn drop(&mut self) {
        self.drain.abort();
    }
}

pub struct NotificationCoordinator {
    notifier: Arc<dyn ChangeNotifier>,
    sink: Arc<dyn NotifySink>,
    latency: Duration,
    active: Mutex<Option<Active>>,
}

impl NotificationCoordinator {
    pub fn new(
        notifier: Arc<dyn ChangeNotifier>,
        sink: Arc<dyn NotifySink>,
        latency: Duration,
    ) -> Self {
        Self {
            notifier,
            sink,
            latency,
            active: Mutex::new(None),
        }
    }

    /// Tear down the current subscription and subscribe to `routes`
    ///
    /// Must be called from within a tokio runtime.
    pub fn rebuild(&self, routes: Vec<WatchRoute>) -> Result<(), WatchError> {
        let mut active = self.active.lock();
        // Old subscription stops before the new one starts
        *active = None;

        if routes.is_empty() {
            debug!("No enabled watchers, notification subscription idle");
            return Ok(());
        }

        let roots = union_roots(&routes);
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.notifier.subscribe(&roots, tx)?;

        let routes = Arc::new(routes);
        let drain = tokio::spawn(drain_batches(
            rx,
            Arc::clone(&routes),
            Arc::clone(&self.sink),
            self.latency,
        ));

        info!(
            watchers = routes.len(),
            roots = roots.len(),
            "Notification subscription rebuilt"
        );

        *active = Some(Active {
            _subscription: subscription,
            drain,
            routes,
        });
        Ok(())
    }

    pub fn routes(&self) -> Vec<WatchRoute> {
        self.active
            .lock()
            .as_ref()
            .map(|a| a.routes.as_ref().clone())
            .unwrap_or_default()
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    pub fn shutdown(&self) {
        *self.active.lock() = None;
    }
}

/// One OS root per distinct path; recursive wins when watchers disagree
fn union_roots(routes: &[WatchRoute]) -> Vec<WatchRoot> {
    let mut roots: BTreeMap<&PathBuf, bool> = BTreeMap::new();
    for route in routes {
        *roots.entry(&route.path).or_insert(false) |= route.recursive;
    }
    roots
        .into_iter()
        .map(|(path, recursive)| WatchRoot {
            path: path.clone(),
            recursive,
        })
        .collect()
}

/// Watchers whose directory equals or contains one of `changed`
fn matching_watchers(routes: &[WatchRoute], changed: &[PathBuf]) -> Vec<WatcherId> {
    routes
        .iter()
        .filter(|route| changed.iter().any(|path| path.starts_with(&route.path)))
        .map(|route| route.watcher_id)
        .collect()
}

async fn drain_batches(
    mut rx: mpsc::UnboundedReceiver<Vec<PathBuf>>,
    routes: Arc<Vec<WatchRoute>>,
    sink: Arc<dyn NotifySink>,
    latency: Duration,
) {
    while let Some(mut batch) = rx.recv().await {
        // Coalesce everything that arrives within the latency window
        let window = tokio::time::sleep(latency);
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = &mut window => break,
                more = rx.recv() => match more {
                    Some(paths) => batch.extend(paths),
                    None => break,
                },
            }
        }

        batch.sort();
        batch.dedup();
        trace!(paths = batch.len(), "change batch");

        for id in matching_watchers(&routes, &batch) {
            sink.notify(id);
        }
    }
}
