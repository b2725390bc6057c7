//! Events published to status observers

use serde::{Deserialize, Serialize};
use settle_core::{SessionId, WatcherId, WatcherPhase};

/// How a convergence loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoopExit {
    /// The directory stopped changing after at least one dispatch
    Converged,
    /// Triggered, but nothing differed from the last known state
    Phantom,
    /// Still changing after the maximum number of dispatches
    IterationCap,
    /// The executor declined to start
    Rejected,
    /// The executor reported a failure
    Failed,
    Cancelled,
    ResolveFailed,
    CaptureFailed,
}

impl LoopExit {
    pub fn label(&self) -> &'static str {
        match self {
            LoopExit::Converged => "converged",
            LoopExit::Phantom => "phantom",
            LoopExit::IterationCap => "iteration cap",
            LoopExit::Rejected => "rejected",
            LoopExit::Failed => "failed",
            LoopExit::Cancelled => "cancelled",
            LoopExit::ResolveFailed => "resolve failed",
            LoopExit::CaptureFailed => "capture failed",
        }
    }
}

impl std::fmt::Display for LoopExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Engine notifications for UIs and the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The configured watcher set changed
    WatchersChanged,
    PhaseChanged {
        watcher_id: WatcherId,
        phase: WatcherPhase,
    },
    ExecutionCompleted {
        watcher_id: WatcherId,
        session_id: Option<SessionId>,
        agent_id: Option<String>,
    },
    ExecutionFailed {
        watcher_id: WatcherId,
        reason: String,
    },
    LoopFinished {
        watcher_id: WatcherId,
        exit: LoopExit,
        dispatches: u32,
    },
}
