//! Convergence engine
//!
//! Owns every piece of per-watcher runtime state: phase, the last known
//! (pre-dispatch) fingerprint and the execution registry. All of it lives
//! behind one mutex so phase transitions and registry changes are
//! serialized. The lock is never held across an `.await`.
//!
//! A triggered watcher runs one convergence loop as a tokio task:
//! capture, dispatch, settle, re-capture, until two consecutive captures
//! agree or the iteration cap is hit.

use crate::coordinator::{NotifySink, WatchRoute};
use crate::debounce::DebounceScheduler;
use crate::events::{EngineEvent, LoopExit};
use crate::executor::{DispatchKind, DispatchRequest, ExecutionOutcome, TaskExecutor};
use crate::registry::ExecutionRegistry;
use crate::resolver::TargetResolver;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use settle_core::{
    capture, CaptureOptions, DebounceWindows, DirectoryFingerprint, FingerprintDiff, IgnoreConfig,
    SessionId, SignatureMode, Watcher, WatcherId, WatcherPhase, WatcherRunInfo,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

/// Default cap on dispatches per trigger
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_iterations: u32,
    pub debounce: DebounceWindows,
    pub signature: SignatureMode,
    pub ignore: IgnoreConfig,
    /// Buffered events per status subscriber
    pub event_capacity: usize,
    /// Absolute paths left out of every capture, e.g. the daemon's state directory
    pub excluded_paths: Vec<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            debounce: DebounceWindows::default(),
            signature: SignatureMode::default(),
            ignore: IgnoreConfig::default(),
            event_capacity: 256,
            excluded_paths: Vec::new(),
        }
    }
}

/// Observable runtime status of one watcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherStatus {
    pub watcher_id: WatcherId,
    pub phase: WatcherPhase,
    pub run_info: Option<WatcherRunInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Debounce,
    RunNow,
}

#[derive(Default)]
struct EngineState {
    watchers: HashMap<WatcherId, Watcher>,
    phases: HashMap<WatcherId, WatcherPhase>,
    last_known: HashMap<WatcherId, Arc<DirectoryFingerprint>>,
    registry: ExecutionRegistry,
    /// Signalled while a loop was registered but had not dispatched yet
    retrigger: HashSet<WatcherId>,
}

impl EngineState {
    fn phase(&self, id: &WatcherId) -> WatcherPhase {
        self.phases.get(id).copied().unwrap_or_default()
    }
}

pub struct Engine {
    config: EngineConfig,
    executor: Arc<dyn TaskExecutor>,
    resolver: Arc<dyn TargetResolver>,
    state: Mutex<EngineState>,
    debounce: DebounceScheduler,
    events: broadcast::Sender<EngineEvent>,
}

impl Engine {
    /// Create an engine and start its debounce expiry task
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: EngineConfig,
        executor: Arc<dyn TaskExecutor>,
        resolver: Arc<dyn TargetResolver>,
    ) -> Arc<Self> {
        let (debounce, mut expired) = DebounceScheduler::new();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let engine = Arc::new(Self {
            config,
            executor,
            resolver,
            state: Mutex::new(EngineState::default()),
            debounce,
            events,
        });

        let weak = Arc::downgrade(&engine);
        tokio::spawn(async move {
            while let Some(id) = expired.recv().await {
                let Some(engine) = weak.upgrade() else {
                    break;
                };
                engine.on_debounce_expired(id);
            }
        });

        engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_phase(&self, state: &mut EngineState, id: WatcherId, phase: WatcherPhase) {
        let previous = if phase == WatcherPhase::Idle {
            state.phases.remove(&id).unwrap_or_default()
        } else {
            state.phases.insert(id, phase).unwrap_or_default()
        };
        if previous != phase {
            debug!(watcher = %id, from = %previous, to = %phase, "phase");
            self.emit(EngineEvent::PhaseChanged {
                watcher_id: id,
                phase,
            });
        }
    }

    /// Replace the configured watcher set
    ///
    /// Watchers that disappeared or were disabled are torn down. Watchers
    /// whose target or recursion changed lose their last known fingerprint.
    pub fn set_watchers(&self, watchers: Vec<Watcher>) {
        let mut state = self.state.lock();
        let incoming: HashMap<WatcherId, Watcher> =
            watchers.into_iter().map(|w| (w.id, w)).collect();

        let previous: Vec<Watcher> = state.watchers.values().cloned().collect();
        for old in previous {
            match incoming.get(&old.id) {
                Some(new) if new.enabled => {
                    if new.target != old.target || new.recursive != old.recursive {
                        state.last_known.remove(&old.id);
                    }
                }
                _ => self.teardown_locked(&mut state, old.id),
            }
        }

        state.watchers = incoming;
        drop(state);

        self.emit(EngineEvent::WatchersChanged);
    }

    pub fn watcher(&self, id: &WatcherId) -> Option<Watcher> {
        self.state.lock().watchers.get(id).cloned()
    }

    /// Resolved directories of all enabled watchers
    ///
    /// Watchers whose target cannot be resolved are skipped.
    pub fn watch_routes(&self) -> Vec<WatchRoute> {
        let enabled: Vec<Watcher> = {
            let state = self.state.lock();
            state
                .watchers
                .values()
                .filter(|w| w.enabled)
                .cloned()
                .collect()
        };

        let mut routes: Vec<WatchRoute> = enabled
            .into_iter()
            .filter_map(|watcher| match self.resolver.resolve(&watcher.target) {
                Ok(path) => Some(WatchRoute {
                    watcher_id: watcher.id,
                    path,
                    recursive: watcher.recursive,
                }),
                Err(e) => {
                    warn!(watcher = %watcher.id, name = %watcher.name, error = %e, "Skipping unresolvable watch path");
                    None
                }
            })
            .collect();
        routes.sort_by(|a, b| a.path.cmp(&b.path));
        routes
    }

    /// Change signal for one watcher
    ///
    /// Moves an idle or debouncing watcher to debouncing and (re)starts its
    /// timer. Signals for a watcher with a dispatch in flight are dropped:
    /// the running loop re-fingerprints on its own. A signal that reaches a
    /// loop before its first dispatch is remembered and runs another loop
    /// once that one exits.
    pub fn notify(&self, id: WatcherId) {
        let mut state = self.state.lock();
        let Some(watcher) = state.watchers.get(&id) else {
            return;
        };
        if !watcher.enabled {
            return;
        }
        let window = self.config.debounce.window(watcher.responsiveness);

        if state.phase(&id).is_in_flight() {
            debug!(watcher = %id, "Signal dropped, execution in flight");
            return;
        }

        self.set_phase(&mut state, id, WatcherPhase::Debouncing);
        if state.registry.is_registered(&id) {
            // Timer starts when the running loop exits
            state.retrigger.insert(id);
        } else {
            self.debounce.signal(id, window);
        }
    }

    fn on_debounce_expired(self: &Arc<Self>, id: WatcherId) {
        self.start_loop(id, Trigger::Debounce);
    }

    /// Start a loop immediately, bypassing debounce
    ///
    /// Only an idle watcher can be run; anything else is a no-op that
    /// returns false. The last known fingerprint is discarded so the first
    /// capture counts as a full baseline.
    pub fn run_now(self: &Arc<Self>, id: WatcherId) -> bool {
        self.start_loop(id, Trigger::RunNow)
    }

    fn start_loop(self: &Arc<Self>, id: WatcherId, trigger: Trigger) -> bool {
        let mut state = self.state.lock();
        let Some(watcher) = state.watchers.get(&id).filter(|w| w.enabled).cloned() else {
            return false;
        };

        let phase = state.phase(&id);
        let eligible = match trigger {
            Trigger::Debounce => phase == WatcherPhase::Debouncing,
            Trigger::RunNow => phase == WatcherPhase::Idle,
        };
        if !eligible {
            debug!(watcher = %id, phase = %phase, trigger = ?trigger, "Trigger ignored");
            return false;
        }

        let Some((execution_id, cancel)) = state.registry.register(id) else {
            // The running loop has not dispatched yet; go again after it
            if trigger == Trigger::Debounce {
                state.retrigger.insert(id);
            }
            debug!(watcher = %id, trigger = ?trigger, "Execution already registered");
            return false;
        };

        if trigger == Trigger::RunNow {
            state.last_known.remove(&id);
        }

        info!(watcher = %id, name = %watcher.name, trigger = ?trigger, "Convergence loop started");

        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            engine.run_loop(watcher, execution_id, cancel).await;
        });
        state.registry.attach_handle(&id, execution_id, handle);
        true
    }

    async fn run_loop(self: Arc<Self>, watcher: Watcher, execution_id: Ulid, cancel: CancellationToken) {
        let mut guard = LoopGuard {
            engine: Arc::clone(&self),
            watcher_id: watcher.id,
            execution_id,
            exit: LoopExit::Cancelled,
            dispatches: 0,
        };
        let exit = self
            .converge(&watcher, execution_id, &cancel, &mut guard.dispatches)
            .await;
        guard.exit = exit;
    }

    /// Apply `f` only while `execution_id` still owns the watcher's entry
    fn with_owned(
        &self,
        id: WatcherId,
        execution_id: Ulid,
        f: impl FnOnce(&Self, &mut EngineState),
    ) -> bool {
        let mut state = self.state.lock();
        if !state.registry.owns(&id, execution_id) {
            return false;
        }
        f(self, &mut *state);
        true
    }

    async fn converge(
        &self,
        watcher: &Watcher,
        execution_id: Ulid,
        cancel: &CancellationToken,
        dispatches: &mut u32,
    ) -> LoopExit {
        let id = watcher.id;

        let watch_path = match self.resolver.resolve(&watcher.target) {
            Ok(path) => path,
            Err(e) => {
                warn!(watcher = %id, error = %e, "Failed to resolve watch path");
                return LoopExit::ResolveFailed;
            }
        };
        let working_folder = match self.resolver.resolve(watcher.working_target()) {
            Ok(path) => path,
            Err(e) => {
                warn!(watcher = %id, error = %e, "Failed to resolve working folder");
                return LoopExit::ResolveFailed;
            }
        };

        let mut excluded = self.nested_watch_paths(id, &watch_path);
        excluded.extend(self.config.excluded_paths.iter().cloned());
        let options = CaptureOptions {
            recursive: watcher.recursive,
            excluded,
            signature: self.config.signature,
            ignore: self.config.ignore.clone(),
        };

        if cancel.is_cancelled() {
            return LoopExit::Cancelled;
        }
        let Some(initial) = self.capture(id, &watch_path, &options).await else {
            return LoopExit::CaptureFailed;
        };

        let mut last_known = self.state.lock().last_known.get(&id).cloned();
        if let Some(previous) = &last_known {
            if !initial.changed_from(previous) {
                return LoopExit::Phantom;
            }
        }

        let max_iterations = self.config.max_iterations.max(1);
        let mut current = Arc::new(initial);

        for iteration in 1..=max_iterations {
            if iteration > 1 {
                match self.capture(id, &watch_path, &options).await {
                    Some(fingerprint) => current = Arc::new(fingerprint),
                    None => return LoopExit::CaptureFailed,
                }
            }

            if let Some(previous) = &last_known {
                if !current.changed_from(previous) {
                    return if iteration == 1 {
                        LoopExit::Phantom
                    } else {
                        LoopExit::Converged
                    };
                }
            }
            if cancel.is_cancelled() {
                return LoopExit::Cancelled;
            }

            let diff = match &last_known {
                Some(previous) => current.diff_from(previous),
                None => FingerprintDiff::baseline(&current),
            };

            let session_id = SessionId::new();
            let run_info = WatcherRunInfo {
                session_id,
                change_count: diff.total(),
                iteration,
                started_at: Utc::now(),
            };
            let pre_dispatch = Arc::clone(&current);
            let still_owned = self.with_owned(id, execution_id, |engine, state| {
                state.last_known.insert(id, pre_dispatch);
                state.registry.set_run_info(&id, execution_id, Some(run_info));
                // Re-captured after this dispatch settles
                state.retrigger.remove(&id);
                engine.set_phase(state, id, WatcherPhase::Processing);
            });
            if !still_owned || cancel.is_cancelled() {
                return LoopExit::Cancelled;
            }
            last_known = Some(Arc::clone(&current));

            let request = DispatchRequest {
                watcher_id: id,
                watcher_name: watcher.name.clone(),
                session_id,
                agent_id: watcher.agent_id.clone(),
                instructions: watcher.instructions.clone(),
                parameters: watcher.parameters.clone(),
                watch_path: watch_path.clone(),
                working_folder: working_folder.clone(),
                iteration,
                kind: DispatchKind::for_iteration(iteration),
                diff,
            };

            info!(watcher = %id, iteration, changes = %diff, "Dispatching");
            let Some(handle) = self.executor.dispatch(request).await else {
                warn!(watcher = %id, iteration, "Executor rejected dispatch");
                return LoopExit::Rejected;
            };
            *dispatches += 1;

            let outcome = tokio::select! {
                outcome = self.executor.await_completion(&handle) => outcome,
                _ = cancel.cancelled() => {
                    self.executor.cancel(&handle).await;
                    let _ = self.executor.await_completion(&handle).await;
                    return LoopExit::Cancelled;
                }
            };

            match outcome {
                ExecutionOutcome::Completed { session_id } => {
                    self.emit(EngineEvent::ExecutionCompleted {
                        watcher_id: id,
                        session_id,
                        agent_id: watcher.agent_id.clone(),
                    });
                }
                ExecutionOutcome::Cancelled => return LoopExit::Cancelled,
                ExecutionOutcome::Failed { reason } => {
                    warn!(watcher = %id, iteration, reason = %reason, "Dispatch failed");
                    self.emit(EngineEvent::ExecutionFailed {
                        watcher_id: id,
                        reason,
                    });
                    return LoopExit::Failed;
                }
            }

            if !self.with_owned(id, execution_id, |engine, state| {
                engine.set_phase(state, id, WatcherPhase::Settling);
            }) {
                return LoopExit::Cancelled;
            }

            tokio::select! {
                _ = tokio::time::sleep(watcher.settle_duration()) => {}
                _ = cancel.cancelled() => return LoopExit::Cancelled,
            }
        }

        // Still changing after the last allowed dispatch: accept the current
        // state so the next trigger starts from here
        let Some(latest) = self.capture(id, &watch_path, &options).await else {
            return LoopExit::CaptureFailed;
        };
        if latest.changed_from(&current) {
            let latest = Arc::new(latest);
            self.with_owned(id, execution_id, |_, state| {
                state.last_known.insert(id, latest);
            });
        } else {
            return LoopExit::Converged;
        }
        warn!(watcher = %id, max_iterations, "Directory still changing, iteration cap reached");
        LoopExit::IterationCap
    }

    /// Directories of other enabled watchers nested strictly inside `root`
    fn nested_watch_paths(&self, id: WatcherId, root: &Path) -> Vec<PathBuf> {
        let others: Vec<Watcher> = {
            let state = self.state.lock();
            state
                .watchers
                .values()
                .filter(|w| w.enabled && w.id != id)
                .cloned()
                .collect()
        };

        others
            .iter()
            .filter_map(|w| self.resolver.resolve(&w.target).ok())
            .filter(|path| path != root && path.starts_with(root))
            .collect()
    }

    async fn capture(
        &self,
        id: WatcherId,
        root: &Path,
        options: &CaptureOptions,
    ) -> Option<DirectoryFingerprint> {
        let root = root.to_path_buf();
        let options = options.clone();
        match tokio::task::spawn_blocking(move || capture(&root, &options)).await {
            Ok(Ok(fingerprint)) => Some(fingerprint),
            Ok(Err(e)) => {
                warn!(watcher = %id, error = %e, "Fingerprint capture failed");
                None
            }
            Err(e) => {
                warn!(watcher = %id, error = %e, "Fingerprint task failed");
                None
            }
        }
    }

    /// Cancel any execution and forget all runtime state for `id`
    ///
    /// The phase reads idle as soon as this returns.
    pub fn teardown(&self, id: WatcherId) {
        let mut state = self.state.lock();
        self.teardown_locked(&mut state, id);
    }

    fn teardown_locked(&self, state: &mut EngineState, id: WatcherId) {
        self.debounce.cancel(&id);
        state.retrigger.remove(&id);
        if state.registry.cancel(&id).is_some() {
            info!(watcher = %id, "Execution cancelled");
        }
        state.last_known.remove(&id);
        self.set_phase(state, id, WatcherPhase::Idle);
    }

    /// Cancel every loop and pending timer
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        let ids: Vec<WatcherId> = state.watchers.keys().copied().collect();
        for id in ids {
            self.debounce.cancel(&id);
            self.set_phase(&mut state, id, WatcherPhase::Idle);
        }
        state.retrigger.clear();
        let cancelled = state.registry.cancel_all();
        if cancelled > 0 {
            info!(cancelled, "Engine shut down");
        }
    }

    pub fn phase(&self, id: &WatcherId) -> WatcherPhase {
        self.state.lock().phase(id)
    }

    pub fn run_info(&self, id: &WatcherId) -> Option<WatcherRunInfo> {
        self.state.lock().registry.run_info(id).cloned()
    }

    pub fn status(&self, id: &WatcherId) -> Option<WatcherStatus> {
        let state = self.state.lock();
        if !state.watchers.contains_key(id) {
            return None;
        }
        Some(WatcherStatus {
            watcher_id: *id,
            phase: state.phase(id),
            run_info: state.registry.run_info(id).cloned(),
        })
    }

    pub fn statuses(&self) -> Vec<WatcherStatus> {
        let state = self.state.lock();
        let mut statuses: Vec<WatcherStatus> = state
            .watchers
            .keys()
            .map(|id| WatcherStatus {
                watcher_id: *id,
                phase: state.phase(id),
                run_info: state.registry.run_info(id).cloned(),
            })
            .collect();
        statuses.sort_by_key(|s| s.watcher_id);
        statuses
    }

    /// Pre-dispatch fingerprint of the most recent dispatch
    pub fn last_known(&self, id: &WatcherId) -> Option<Arc<DirectoryFingerprint>> {
        self.state.lock().last_known.get(id).cloned()
    }

    /// Number of registered executions for `id` (0 or 1)
    pub fn execution_count(&self, id: &WatcherId) -> usize {
        usize::from(self.state.lock().registry.is_registered(id))
    }

    pub fn active_executions(&self) -> usize {
        self.state.lock().registry.len()
    }

    pub fn pending_debounces(&self) -> usize {
        self.debounce.pending_count()
    }
}

impl NotifySink for Engine {
    fn notify(&self, id: WatcherId) {
        Engine::notify(self, id);
    }
}

/// Cleanup that runs on every loop exit, panics included
struct LoopGuard {
    engine: Arc<Engine>,
    watcher_id: WatcherId,
    execution_id: Ulid,
    exit: LoopExit,
    dispatches: u32,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        let id = self.watcher_id;
        let engine = &self.engine;

        {
            let mut state = engine.state.lock();
            // A teardown or a newer loop already owns the state
            if state.registry.unregister_if(&id, self.execution_id).is_some() {
                let retrigger = state.retrigger.remove(&id);
                let window = state
                    .watchers
                    .get(&id)
                    .filter(|w| w.enabled)
                    .map(|w| engine.config.debounce.window(w.responsiveness));
                match window {
                    Some(window) if retrigger => {
                        engine.set_phase(&mut state, id, WatcherPhase::Debouncing);
                        engine.debounce.signal(id, window);
                    }
                    _ => engine.set_phase(&mut state, id, WatcherPhase::Idle),
                }
            }
        }

        match self.exit {
            LoopExit::Phantom => debug!(watcher = %id, "Phantom trigger, nothing changed"),
            exit => info!(watcher = %id, exit = %exit, dispatches = self.dispatches, "Convergence loop finished"),
        }
        engine.emit(EngineEvent::LoopFinished {
            watcher_id: id,
            exit: self.exit,
            dispatches: self.dispatches,
        });
    }
}
