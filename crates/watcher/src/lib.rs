//! Directory watching engine for Settle
//!
//! This crate turns "something changed" signals into executor dispatches
//! and keeps re-checking until the directory stops changing:
//! - Per-watcher debouncing with restartable timers
//! - A single OS subscription routed to watchers by path prefix
//! - The convergence loop (capture, dispatch, settle, re-capture)
//! - Execution bookkeeping and cooperative cancellation
//! - A CRUD facade that keeps all of the above in sync with the store

pub mod coordinator;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod platform;
pub mod registry;
pub mod resolver;
pub mod service;

// Re-export main types for convenience
pub use coordinator::{NotificationCoordinator, NotifySink, WatchRoute};
pub use debounce::DebounceScheduler;
pub use engine::{Engine, EngineConfig, WatcherStatus, DEFAULT_MAX_ITERATIONS};
pub use error::{ServiceError, ServiceResult, WatchError};
pub use events::{EngineEvent, LoopExit};
pub use executor::{
    render_prompt, CommandConfig, CommandExecutor, DispatchHandle, DispatchKind, DispatchRequest,
    ExecutionOutcome, TaskExecutor,
};
pub use platform::{ChangeNotifier, NotifyBackend, Subscription, WatchRoot};
pub use registry::{Execution, ExecutionRegistry};
pub use resolver::{FsResolver, TargetResolver};
pub use service::WatcherService;
