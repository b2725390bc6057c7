//! Watcher access for CLI commands
//!
//! Reads always come from the watcher file. Writes go through the daemon
//! when one is running, so it can rebuild its subscriptions; otherwise the
//! file is edited directly and picked up on the next daemon start.

use crate::daemon::{self, DaemonPaths};
use crate::ipc::{IpcClient, Request, Response};
use anyhow::{bail, Context, Result};
use settle_core::{Watcher, WatcherId};
use settle_store::{JsonStore, WatchStore};

pub struct WatcherAccess {
    store: JsonStore,
    client: Option<IpcClient>,
}

impl WatcherAccess {
    pub async fn open(paths: &DaemonPaths) -> Result<Self> {
        let store = JsonStore::open(&paths.watchers)
            .with_context(|| format!("Failed to open {}", paths.watchers.display()))?;
        let client = daemon::connect(paths).await;
        Ok(Self { store, client })
    }

    /// Offline access that never contacts a daemon
    pub fn offline(store: JsonStore) -> Self {
        Self {
            store,
            client: None,
        }
    }

    pub fn daemon_connected(&self) -> bool {
        self.client.is_some()
    }

    pub fn store(&self) -> &JsonStore {
        &self.store
    }

    pub fn list(&self) -> Result<Vec<Watcher>> {
        Ok(self.store.load_all()?)
    }

    pub fn resolve(&self, reference: &str) -> Result<Watcher> {
        let watchers = self.list()?;
        crate::util::resolve_watcher_ref(reference, &watchers).cloned()
    }

    /// Create or replace
    pub async fn upsert(&mut self, watcher: Watcher) -> Result<Watcher> {
        if watcher.name.trim().is_empty() {
            bail!("Watcher name must not be empty");
        }
        match &mut self.client {
            Some(client) => match client.call(&Request::Upsert { watcher }).await? {
                Response::Watcher { watcher } => Ok(watcher),
                other => bail!("Unexpected daemon response: {:?}", other),
            },
            None => {
                self.store.save(&watcher)?;
                Ok(watcher)
            }
        }
    }

    pub async fn delete(&mut self, id: WatcherId) -> Result<()> {
        match &mut self.client {
            Some(client) => {
                client.call(&Request::Delete { id }).await?;
            }
            None => {
                if !self.store.delete(&id)? {
                    bail!("Watcher not found: {}", id);
                }
            }
        }
        Ok(())
    }

    pub async fn set_enabled(&mut self, id: WatcherId, enabled: bool) -> Result<Watcher> {
        match &mut self.client {
            Some(client) => match client.call(&Request::SetEnabled { id, enabled }).await? {
                Response::Watcher { watcher } => Ok(watcher),
                other => bail!("Unexpected daemon response: {:?}", other),
            },
            None => {
                let mut watcher = self
                    .list()?
                    .into_iter()
                    .find(|w| w.id == id)
                    .with_context(|| format!("Watcher not found: {}", id))?;
                watcher.enabled = enabled;
                self.store.save(&watcher)?;
                Ok(watcher)
            }
        }
    }

    /// Ask the daemon to run a watcher; `None` when no daemon is connected
    pub async fn run_now(&mut self, id: WatcherId) -> Result<Option<bool>> {
        let Some(client) = &mut self.client else {
            return Ok(None);
        };
        match client.call(&Request::RunNow { id }).await? {
            Response::Started { started } => Ok(Some(started)),
            other => bail!("Unexpected daemon response: {:?}", other),
        }
    }

    pub fn client(&mut self) -> Option<&mut IpcClient> {
        self.client.as_mut()
    }
}
