//! Bookkeeping for running convergence loops
//!
//! The registry is plain data; the engine keeps it inside its state mutex so
//! registry changes are serialized with phase transitions.

use chrono::{DateTime, Utc};
use settle_core::{WatcherId, WatcherRunInfo};
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

/// One live convergence loop
#[derive(Debug)]
pub struct Execution {
    /// Distinguishes this loop from any later loop for the same watcher
    pub execution_id: Ulid,
    pub cancel: CancellationToken,
    pub handle: Option<JoinHandle<()>>,
    pub run_info: Option<WatcherRunInfo>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ExecutionRegistry {
    executions: HashMap<WatcherId, Execution>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new loop for `id`
    ///
    /// Returns `None` when one is already registered.
    pub fn register(&mut self, id: WatcherId) -> Option<(Ulid, CancellationToken)> {
        if self.executions.contains_key(&id) {
            return None;
        }

        let execution_id = Ulid::new();
        let cancel = CancellationToken::new();
        self.executions.insert(
            id,
            Execution {
                execution_id,
                cancel: cancel.clone(),
                handle: None,
                run_info: None,
                started_at: Utc::now(),
            },
        );
        Some((execution_id, cancel))
    }

    pub fn is_registered(&self, id: &WatcherId) -> bool {
        self.executions.contains_key(id)
    }

    /// True iff `execution_id` is still the registered loop for `id`
    pub fn owns(&self, id: &WatcherId, execution_id: Ulid) -> bool {
        self.executions
            .get(id)
            .map_or(false, |e| e.execution_id == execution_id)
    }

    pub fn attach_handle(&mut self, id: &WatcherId, execution_id: Ulid, handle: JoinHandle<()>) {
        match self.executions.get_mut(id) {
            Some(execution) if execution.execution_id == execution_id => {
                execution.handle = Some(handle);
            }
            // The loop already finished and unregistered itself
            _ => drop(handle),
        }
    }

    pub fn set_run_info(
        &mut self,
        id: &WatcherId,
        execution_id: Ulid,
        run_info: Option<WatcherRunInfo>,
    ) -> bool {
        match self.executions.get_mut(id) {
            Some(execution) if execution.execution_id == execution_id => {
                execution.run_info = run_info;
                true
            }
            _ => false,
        }
    }

    pub fn run_info(&self, id: &WatcherId) -> Option<&WatcherRunInfo> {
        self.executions.get(id).and_then(|e| e.run_info.as_ref())
    }

    pub fn get(&self, id: &WatcherId) -> Option<&Execution> {
        self.executions.get(id)
    }

    /// Remove the entry only if it still belongs to `execution_id`
    pub fn unregister_if(&mut self, id: &WatcherId, execution_id: Ulid) -> Option<Execution> {
        if self.owns(id, execution_id) {
            self.executions.remove(id)
        } else {
            None
        }
    }

    /// Remove the entry and fire its cancellation token
    pub fn cancel(&mut self, id: &WatcherId) -> Option<Execution> {
        let execution = self.executions.remove(id)?;
        execution.cancel.cancel();
        Some(execution)
    }

    /// Cancel every registered loop
    pub fn cancel_all(&mut self) -> usize {
        let count = self.executions.len();
        for (_, execution) in self.executions.drain() {
            execution.cancel.cancel();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }
}
