//! Task executor seam
//!
//! The engine hands each dispatch to a [`TaskExecutor`] and treats it as a
//! black box that eventually completes, fails or is cancelled.

mod command;
mod prompt;

pub use command::{CommandConfig, CommandExecutor};
pub use prompt::render_prompt;

use async_trait::async_trait;
use settle_core::{FingerprintDiff, SessionId, WatcherId};
use std::collections::BTreeMap;
use std::path::PathBuf;
use ulid::Ulid;

/// Which pass of the convergence loop a dispatch belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    /// First dispatch for a trigger: inspect the changes and act
    Initial,
    /// Re-check after the previous dispatch's own writes
    FollowUp,
}

impl DispatchKind {
    pub fn for_iteration(iteration: u32) -> Self {
        if iteration <= 1 {
            DispatchKind::Initial
        } else {
            DispatchKind::FollowUp
        }
    }
}

/// One unit of work for the executor
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub watcher_id: WatcherId,
    pub watcher_name: String,
    pub session_id: SessionId,
    pub agent_id: Option<String>,
    pub instructions: String,
    pub parameters: BTreeMap<String, String>,
    pub watch_path: PathBuf,
    pub working_folder: PathBuf,
    pub iteration: u32,
    pub kind: DispatchKind,
    pub diff: FingerprintDiff,
}

/// Reference to an accepted dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchHandle {
    pub id: Ulid,
    pub watcher_id: WatcherId,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed { session_id: Option<SessionId> },
    Cancelled,
    Failed { reason: String },
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Start a dispatch; `None` means the executor declined it
    async fn dispatch(&self, request: DispatchRequest) -> Option<DispatchHandle>;

    /// Wait for an accepted dispatch to finish
    async fn await_completion(&self, handle: &DispatchHandle) -> ExecutionOutcome;

    /// Ask a running dispatch to stop; completion then reports `Cancelled`
    async fn cancel(&self, handle: &DispatchHandle);
}
