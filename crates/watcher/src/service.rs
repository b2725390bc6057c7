//! Watcher facade
//!
//! CRUD over persisted watchers. Every mutation persists first, then pushes
//! the new watcher list into the engine and rebuilds the notification
//! subscription. Deleting or disabling a watcher tears down its runtime
//! state.

use crate::coordinator::{NotificationCoordinator, NotifySink};
use crate::engine::{Engine, WatcherStatus};
use crate::error::{ServiceError, ServiceResult};
use crate::events::EngineEvent;
use crate::platform::ChangeNotifier;
use chrono::Utc;
use parking_lot::Mutex;
use settle_core::{SessionId, Watcher, WatcherId};
use settle_store::WatchStore;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct WatcherService<S: WatchStore> {
    store: S,
    engine: Arc<Engine>,
    coordinator: NotificationCoordinator,
    /// In-memory copy of the store; also serializes mutations
    watchers: Mutex<Vec<Watcher>>,
    recorder: Mutex<Option<JoinHandle<()>>>,
}

impl<S: WatchStore + 'static> WatcherService<S> {
    /// Load watchers from `store`, subscribe to their directories and start
    /// recording completed executions
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        store: S,
        engine: Arc<Engine>,
        notifier: Arc<dyn ChangeNotifier>,
        latency: Duration,
    ) -> ServiceResult<Arc<Self>> {
        let sink: Arc<dyn NotifySink> = Arc::clone(&engine) as Arc<dyn NotifySink>;
        let coordinator = NotificationCoordinator::new(notifier, sink, latency);

        let service = Arc::new(Self {
            store,
            engine,
            coordinator,
            watchers: Mutex::new(Vec::new()),
            recorder: Mutex::new(None),
        });

        service.reload()?;
        let recorder = spawn_recorder(Arc::downgrade(&service), service.engine.subscribe());
        *service.recorder.lock() = Some(recorder);

        Ok(service)
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn list(&self) -> Vec<Watcher> {
        self.watchers.lock().clone()
    }

    pub fn get(&self, id: &WatcherId) -> Option<Watcher> {
        self.watchers.lock().iter().find(|w| &w.id == id).cloned()
    }

    pub fn create(&self, watcher: Watcher) -> ServiceResult<Watcher> {
        validate(&watcher)?;
        {
            let mut watchers = self.watchers.lock();
            if watchers.iter().any(|w| w.id == watcher.id) {
                return Err(ServiceError::Invalid(format!(
                    "watcher {} already exists",
                    watcher.id
                )));
            }
            self.store.save(&watcher)?;
            watchers.push(watcher.clone());
        }
        info!(watcher = %watcher.id, name = %watcher.name, "Watcher created");
        self.apply()?;
        Ok(watcher)
    }

    pub fn update(&self, watcher: Watcher) -> ServiceResult<Watcher> {
        validate(&watcher)?;
        {
            let mut watchers = self.watchers.lock();
            let slot = watchers
                .iter_mut()
                .find(|w| w.id == watcher.id)
                .ok_or(ServiceError::NotFound(watcher.id))?;
            self.store.save(&watcher)?;
            *slot = watcher.clone();
        }
        if !watcher.enabled {
            self.engine.teardown(watcher.id);
        }
        info!(watcher = %watcher.id, name = %watcher.name, "Watcher updated");
        self.apply()?;
        Ok(watcher)
    }

    pub fn delete(&self, id: &WatcherId) -> ServiceResult<()> {
        {
            let mut watchers = self.watchers.lock();
            if !watchers.iter().any(|w| &w.id == id) {
                return Err(ServiceError::NotFound(*id));
            }
            if !self.store.delete(id)? {
                debug!(watcher = %id, "Watcher was already gone from the store");
            }
            watchers.retain(|w| &w.id != id);
        }
        self.engine.teardown(*id);
        info!(watcher = %id, "Watcher deleted");
        self.apply()
    }

    pub fn set_enabled(&self, id: &WatcherId, enabled: bool) -> ServiceResult<Watcher> {
        let updated = {
            let mut watchers = self.watchers.lock();
            let slot = watchers
                .iter_mut()
                .find(|w| &w.id == id)
                .ok_or(ServiceError::NotFound(*id))?;
            if slot.enabled == enabled {
                return Ok(slot.clone());
            }
            let mut updated = slot.clone();
            updated.enabled = enabled;
            self.store.save(&updated)?;
            *slot = updated.clone();
            updated
        };
        if !enabled {
            self.engine.teardown(*id);
        }
        info!(watcher = %id, enabled, "Watcher toggled");
        self.apply()?;
        Ok(updated)
    }

    /// Run a watcher now; false when it is busy or disabled
    pub fn run_now(&self, id: &WatcherId) -> ServiceResult<bool> {
        if self.get(id).is_none() {
            return Err(ServiceError::NotFound(*id));
        }
        Ok(self.engine.run_now(*id))
    }

    pub fn status(&self, id: &WatcherId) -> Option<WatcherStatus> {
        self.engine.status(id)
    }

    pub fn statuses(&self) -> Vec<WatcherStatus> {
        self.engine.statuses()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.engine.subscribe()
    }

    /// Re-read the store and rebuild everything derived from it
    pub fn reload(&self) -> ServiceResult<()> {
        let loaded = self.store.load_all()?;
        debug!(count = loaded.len(), "Loaded watchers");
        *self.watchers.lock() = loaded;
        self.apply()
    }

    pub fn shutdown(&self) {
        if let Some(recorder) = self.recorder.lock().take() {
            recorder.abort();
        }
        self.coordinator.shutdown();
        self.engine.shutdown();
    }

    fn apply(&self) -> ServiceResult<()> {
        let snapshot = self.list();
        self.engine.set_watchers(snapshot);
        self.coordinator.rebuild(self.engine.watch_routes())?;
        Ok(())
    }

    /// Persist the outcome of a completed execution without a rebuild
    fn record_completion(&self, id: WatcherId, session_id: Option<SessionId>) -> ServiceResult<()> {
        let mut watchers = self.watchers.lock();
        let Some(slot) = watchers.iter_mut().find(|w| w.id == id) else {
            return Ok(());
        };
        let mut updated = slot.clone();
        updated.last_triggered_at = Some(Utc::now());
        if session_id.is_some() {
            updated.last_session_id = session_id;
        }
        self.store.save(&updated)?;
        *slot = updated;
        Ok(())
    }
}

impl<S: WatchStore> Drop for WatcherService<S> {
    fn drop(&mut self) {
        if let Some(recorder) = self.recorder.get_mut().take() {
            recorder.abort();
        }
    }
}

fn validate(watcher: &Watcher) -> ServiceResult<()> {
    if watcher.name.trim().is_empty() {
        return Err(ServiceError::Invalid("name must not be empty".to_string()));
    }
    if watcher.target.as_path().as_os_str().is_empty() {
        return Err(ServiceError::Invalid("target must not be empty".to_string()));
    }
    Ok(())
}

fn spawn_recorder<S: WatchStore + 'static>(
    service: Weak<WatcherService<S>>,
    mut events: broadcast::Receiver<EngineEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::ExecutionCompleted {
                    watcher_id,
                    session_id,
                    ..
                }) => {
                    let Some(service) = service.upgrade() else {
                        break;
                    };
                    if let Err(e) = service.record_completion(watcher_id, session_id) {
                        warn!(watcher = %watcher_id, error = %e, "Failed to record completed execution");
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Completion recorder lagged behind engine events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
