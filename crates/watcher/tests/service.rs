//! Facade behaviour against a real JSON store

mod common;

use common::{next_loop_exit, wait_until, Behavior, ScriptedExecutor, DEBOUNCE, SETTLE_MS};
use settle_core::{DebounceWindows, WatchTarget, Watcher, WatcherPhase};
use settle_store::{JsonStore, WatchStore};
use settle_watcher::{
    ChangeNotifier, Engine, EngineConfig, FsResolver, LoopExit, NotifyBackend, ServiceError,
    WatcherService,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn start(
    state_dir: &TempDir,
    behavior: Behavior,
) -> (Arc<WatcherService<Arc<JsonStore>>>, Arc<JsonStore>, Arc<ScriptedExecutor>) {
    let store = Arc::new(JsonStore::open(state_dir.path().join("watchers.json")).unwrap());
    let executor = Arc::new(ScriptedExecutor::new(behavior));
    let engine = Engine::new(
        EngineConfig {
            debounce: DebounceWindows::uniform(DEBOUNCE),
            ..EngineConfig::default()
        },
        executor.clone(),
        Arc::new(FsResolver),
    );
    let notifier: Arc<dyn ChangeNotifier> = Arc::new(NotifyBackend);
    let service = WatcherService::start(
        Arc::clone(&store),
        engine,
        notifier,
        Duration::from_millis(20),
    )
    .unwrap();
    (service, store, executor)
}

fn watcher(dir: &TempDir) -> Watcher {
    let mut watcher = Watcher::new("desk", WatchTarget::new(dir.path()));
    watcher.settle_ms = SETTLE_MS;
    watcher
}

#[tokio::test]
async fn test_completion_is_recorded_in_store() {
    let state_dir = TempDir::new().unwrap();
    let watched = TempDir::new().unwrap();
    std::fs::write(watched.path().join("todo.txt"), b"x").unwrap();

    let (service, store, _executor) = start(&state_dir, Behavior::NoOp);
    let created = service.create(watcher(&watched)).unwrap();
    let mut events = service.subscribe();

    assert!(service.run_now(&created.id).unwrap());
    assert_eq!(next_loop_exit(&mut events).await.0, LoopExit::Converged);

    wait_until(|| {
        store
            .load_all()
            .unwrap()
            .iter()
            .any(|w| w.id == created.id && w.last_session_id.is_some())
    })
    .await;

    let stored = service.get(&created.id).unwrap();
    assert!(stored.last_triggered_at.is_some());
    assert!(stored.last_session_id.is_some());
}

#[tokio::test]
async fn test_disable_through_facade_cancels_execution() {
    let state_dir = TempDir::new().unwrap();
    let watched = TempDir::new().unwrap();

    let (service, store, _executor) = start(&state_dir, Behavior::Hold);
    let created = service.create(watcher(&watched)).unwrap();
    let mut events = service.subscribe();

    service.run_now(&created.id).unwrap();
    wait_until(|| {
        service
            .status(&created.id)
            .map_or(false, |s| s.phase == WatcherPhase::Processing)
    })
    .await;

    service.set_enabled(&created.id, false).unwrap();

    let status = service.status(&created.id).unwrap();
    assert_eq!(status.phase, WatcherPhase::Idle);
    assert!(status.run_info.is_none());
    assert!(!store.load_all().unwrap()[0].enabled);
    assert_eq!(next_loop_exit(&mut events).await.0, LoopExit::Cancelled);

    // Disabled watchers cannot be run
    assert!(!service.run_now(&created.id).unwrap());
}

#[tokio::test]
async fn test_watchers_survive_restart() {
    let state_dir = TempDir::new().unwrap();
    let watched = TempDir::new().unwrap();

    let id = {
        let (service, _store, _executor) = start(&state_dir, Behavior::NoOp);
        let created = service.create(watcher(&watched)).unwrap();
        service.shutdown();
        created.id
    };

    let (service, _store, _executor) = start(&state_dir, Behavior::NoOp);
    assert_eq!(service.list().len(), 1);
    assert_eq!(service.get(&id).unwrap().name, "desk");
    assert_eq!(service.status(&id).unwrap().phase, WatcherPhase::Idle);
}

#[tokio::test]
async fn test_unknown_watcher_operations_fail() {
    let state_dir = TempDir::new().unwrap();
    let (service, _store, _executor) = start(&state_dir, Behavior::NoOp);
    let stranger = settle_core::WatcherId::new();

    assert!(matches!(
        service.run_now(&stranger),
        Err(ServiceError::NotFound(_))
    ));
    assert!(matches!(
        service.set_enabled(&stranger, true),
        Err(ServiceError::NotFound(_))
    ));
    assert!(service.status(&stranger).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_file_change_triggers_dispatch_end_to_end() {
    let state_dir = TempDir::new().unwrap();
    let watched = TempDir::new().unwrap();

    let (service, _store, executor) = start(&state_dir, Behavior::NoOp);
    let created = service.create(watcher(&watched)).unwrap();
    let mut events = service.subscribe();

    // Give the OS subscription a moment to attach
    tokio::time::sleep(Duration::from_millis(200)).await;
    std::fs::write(watched.path().join("scan-001.pdf"), b"scanned").unwrap();

    let (exit, dispatches) = next_loop_exit(&mut events).await;
    assert_eq!(exit, LoopExit::Converged);
    assert_eq!(dispatches, 1);
    assert_eq!(executor.requests()[0].watcher_id, created.id);
}
