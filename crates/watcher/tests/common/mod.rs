//! Common utilities for engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::{Condvar, Mutex};
use settle_core::{
    capture, CaptureOptions, DebounceWindows, DirectoryFingerprint, ResolveError, WatchTarget,
    Watcher,
};
use settle_watcher::{
    DispatchHandle, DispatchRequest, Engine, EngineConfig, EngineEvent, ExecutionOutcome, FsResolver,
    LoopExit, TargetResolver, TaskExecutor,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

pub const DEBOUNCE: Duration = Duration::from_millis(20);
pub const SETTLE_MS: u64 = 10;
pub const MAX_ITERATIONS: u32 = 5;

/// What the scripted executor does on each dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Complete without touching the directory
    NoOp,
    /// Write a new file on every dispatch, so the directory never converges
    Touch,
    Fail,
    Reject,
    /// Stay running until cancelled
    Hold,
}

pub struct ScriptedExecutor {
    behavior: Mutex<Behavior>,
    requests: Mutex<Vec<DispatchRequest>>,
    held: Mutex<HashMap<Ulid, CancellationToken>>,
    counter: AtomicU32,
}

impl ScriptedExecutor {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            requests: Mutex::new(Vec::new()),
            held: Mutex::new(HashMap::new()),
            counter: AtomicU32::new(0),
        }
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn requests(&self) -> Vec<DispatchRequest> {
        self.requests.lock().clone()
    }

    pub fn dispatch_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn dispatch(&self, request: DispatchRequest) -> Option<DispatchHandle> {
        let behavior = *self.behavior.lock();
        if behavior == Behavior::Reject {
            return None;
        }
        if behavior == Behavior::Touch {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            std::fs::write(
                request.working_folder.join(format!("organized-{}.txt", n)),
                format!("pass {}", n),
            )
            .ok()?;
        }

        let handle = DispatchHandle {
            id: Ulid::new(),
            watcher_id: request.watcher_id,
            session_id: request.session_id,
        };
        self.held.lock().insert(handle.id, CancellationToken::new());
        self.requests.lock().push(request);
        Some(handle)
    }

    async fn await_completion(&self, handle: &DispatchHandle) -> ExecutionOutcome {
        let behavior = *self.behavior.lock();
        match behavior {
            Behavior::Fail => ExecutionOutcome::Failed {
                reason: "scripted failure".to_string(),
            },
            Behavior::Hold => {
                let token = self.held.lock().get(&handle.id).cloned();
                if let Some(token) = token {
                    token.cancelled().await;
                }
                ExecutionOutcome::Cancelled
            }
            _ => ExecutionOutcome::Completed {
                session_id: Some(handle.session_id),
            },
        }
    }

    async fn cancel(&self, handle: &DispatchHandle) {
        if let Some(token) = self.held.lock().get(&handle.id) {
            token.cancel();
        }
    }
}

/// Filesystem resolver that can park loops before their first capture
///
/// Blocks the calling thread, so tests using it need the multi-threaded
/// runtime.
#[derive(Default)]
pub struct GatedResolver {
    held: Mutex<bool>,
    released: Condvar,
    parked: AtomicBool,
}

impl GatedResolver {
    pub fn hold(&self) {
        *self.held.lock() = true;
    }

    pub fn release(&self) {
        *self.held.lock() = false;
        self.released.notify_all();
    }

    /// A loop is currently waiting inside `resolve`
    pub fn is_parked(&self) -> bool {
        self.parked.load(Ordering::SeqCst)
    }
}

impl TargetResolver for GatedResolver {
    fn resolve(&self, target: &WatchTarget) -> Result<PathBuf, ResolveError> {
        let mut held = self.held.lock();
        if *held {
            self.parked.store(true, Ordering::SeqCst);
            while *held {
                self.released.wait(&mut held);
            }
            self.parked.store(false, Ordering::SeqCst);
        }
        drop(held);
        FsResolver.resolve(target)
    }
}

/// One watcher over a temp directory, wired to a scripted executor
pub struct Harness {
    pub dir: TempDir,
    pub engine: Arc<Engine>,
    pub executor: Arc<ScriptedExecutor>,
    pub watcher: Watcher,
}

impl Harness {
    pub fn new(behavior: Behavior) -> Self {
        Self::with_resolver(behavior, Arc::new(FsResolver))
    }

    pub fn with_resolver(behavior: Behavior, resolver: Arc<dyn TargetResolver>) -> Self {
        Self::build(behavior, resolver, |_, _| {})
    }

    /// Adjust the engine config; `configure` gets the canonical watch root
    pub fn with_config(behavior: Behavior, configure: impl FnOnce(&mut EngineConfig, &Path)) -> Self {
        Self::build(behavior, Arc::new(FsResolver), configure)
    }

    fn build(
        behavior: Behavior,
        resolver: Arc<dyn TargetResolver>,
        configure: impl FnOnce(&mut EngineConfig, &Path),
    ) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("report.pdf"), b"quarterly numbers").unwrap();
        std::fs::write(dir.path().join("photo.jpg"), b"not really a jpeg").unwrap();

        let mut config = EngineConfig {
            max_iterations: MAX_ITERATIONS,
            debounce: DebounceWindows::uniform(DEBOUNCE),
            ..EngineConfig::default()
        };
        configure(&mut config, &dir.path().canonicalize().unwrap());

        let executor = Arc::new(ScriptedExecutor::new(behavior));
        let engine = Engine::new(config, executor.clone(), resolver);

        let mut watcher = Watcher::new("inbox", WatchTarget::new(dir.path()));
        watcher.instructions = "Organize files by type".to_string();
        watcher.settle_ms = SETTLE_MS;
        engine.set_watchers(vec![watcher.clone()]);

        Self {
            dir,
            engine,
            executor,
            watcher,
        }
    }

    /// Fingerprint the directory the way the engine does
    pub fn capture(&self) -> DirectoryFingerprint {
        let root = self.dir.path().canonicalize().unwrap();
        capture(&root, &CaptureOptions::recursive()).unwrap()
    }

    pub fn write(&self, name: &str, contents: &str) {
        std::fs::write(self.dir.path().join(name), contents).unwrap();
    }
}

/// Wait for the next `LoopFinished` event
pub async fn next_loop_exit(events: &mut broadcast::Receiver<EngineEvent>) -> (LoopExit, u32) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(EngineEvent::LoopFinished {
                    exit, dispatches, ..
                }) => return (exit, dispatches),
                Ok(_) => continue,
                Err(e) => panic!("event stream ended: {}", e),
            }
        }
    })
    .await
    .expect("loop did not finish in time")
}

/// Poll `condition` until it holds or a few seconds pass
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
