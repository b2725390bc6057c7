//! Daemon lifecycle management

use crate::ipc::{self, DaemonStatus, IpcClient, Request, Response};
use crate::locks::DaemonLock;
use crate::system_config::{SystemConfig, LOGS_DIR, SOCKET_FILE, WATCHERS_FILE};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use settle_store::{JsonStore, WatchStore};
use settle_watcher::{CommandExecutor, Engine, FsResolver, NotifyBackend, WatcherService};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);
const STOP_POLL: Duration = Duration::from_millis(100);

/// Files the daemon keeps under its state directory
#[derive(Debug, Clone)]
pub struct DaemonPaths {
    pub state_dir: PathBuf,
    pub watchers: PathBuf,
    pub socket: PathBuf,
    pub logs: PathBuf,
}

impl DaemonPaths {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        Self {
            watchers: state_dir.join(WATCHERS_FILE),
            socket: state_dir.join(SOCKET_FILE),
            logs: state_dir.join(LOGS_DIR),
            state_dir,
        }
    }

    pub fn from_config(config: &SystemConfig) -> Result<Self> {
        Ok(Self::new(config.state_dir()?))
    }
}

/// Run the daemon in the current process until a stop request or signal
pub async fn run_foreground(config: SystemConfig) -> Result<()> {
    let paths = DaemonPaths::from_config(&config)?;
    std::fs::create_dir_all(&paths.state_dir).with_context(|| {
        format!("Failed to create state directory {}", paths.state_dir.display())
    })?;

    let lock = DaemonLock::acquire(&paths.state_dir)?;
    let started_at = Utc::now();

    let store = JsonStore::open(&paths.watchers)
        .with_context(|| format!("Failed to open {}", paths.watchers.display()))?;
    if config.executor.program.is_empty() {
        warn!("executor.program is not configured; every dispatch will be rejected");
    }
    let executor = Arc::new(CommandExecutor::new(config.executor.clone()));
    let engine = Engine::new(config.engine_config(), executor, Arc::new(FsResolver));
    let service = WatcherService::start(
        store,
        engine,
        Arc::new(NotifyBackend),
        config.notify_latency(),
    )?;

    let listener = ipc::bind(&paths.socket)?;
    let shutdown = CancellationToken::new();
    info!(
        pid = std::process::id(),
        socket = %paths.socket.display(),
        watchers = service.list().len(),
        "Daemon started"
    );

    let terminate = terminate_signal();
    tokio::pin!(terminate);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Stop requested");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = &mut terminate => {
                info!("Terminated");
                break;
            }
            accepted = listener.accept() => {
                let (stream, _) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept IPC connection");
                        continue;
                    }
                };
                let service = Arc::clone(&service);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let result = ipc::serve_connection(stream, |request| {
                        handle_request(&service, request, started_at, &shutdown)
                    })
                    .await;
                    if let Err(e) = result {
                        debug!(error = %e, "IPC connection ended with error");
                    }
                });
            }
        }
    }

    service.shutdown();
    drop(listener);
    if let Err(e) = std::fs::remove_file(&paths.socket) {
        debug!(error = %e, "Socket already removed");
    }
    if let Err(e) = lock.release() {
        error!(error = %e, "Failed to release daemon lock");
    }
    info!("Daemon stopped");
    Ok(())
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}

/// Apply one IPC request to the running service
pub fn handle_request<S: WatchStore + 'static>(
    service: &WatcherService<S>,
    request: Request,
    started_at: DateTime<Utc>,
    shutdown: &CancellationToken,
) -> Response {
    debug!(?request, "IPC request");
    let result = match request {
        Request::Status => Ok(Response::Status(DaemonStatus {
            pid: std::process::id(),
            started_at,
            active_executions: service.engine().active_executions(),
            watchers: service.statuses(),
        })),
        Request::RunNow { id } => service
            .run_now(&id)
            .map(|started| Response::Started { started }),
        Request::Upsert { watcher } => {
            let saved = if service.get(&watcher.id).is_some() {
                service.update(watcher)
            } else {
                service.create(watcher)
            };
            saved.map(|watcher| Response::Watcher { watcher })
        }
        Request::Delete { id } => service.delete(&id).map(|_| Response::Ok),
        Request::SetEnabled { id, enabled } => service
            .set_enabled(&id, enabled)
            .map(|watcher| Response::Watcher { watcher }),
        Request::Reload => service.reload().map(|_| Response::Ok),
        Request::Stop => {
            shutdown.cancel();
            Ok(Response::Ok)
        }
    };

    result.unwrap_or_else(|e| Response::Error {
        message: e.to_string(),
    })
}

/// Live daemon for `state_dir`, if any
pub fn is_running(state_dir: &Path) -> bool {
    DaemonLock::holder(state_dir).is_some()
}

/// Connect to the daemon if one is running
pub async fn connect(paths: &DaemonPaths) -> Option<IpcClient> {
    if !is_running(&paths.state_dir) {
        return None;
    }
    match IpcClient::connect(&paths.socket).await {
        Ok(client) => Some(client),
        Err(e) => {
            warn!(error = %e, "Daemon holds the lock but its socket is unreachable");
            None
        }
    }
}

/// Ask the daemon to stop and wait until it has released its lock
pub async fn stop(paths: &DaemonPaths) -> Result<bool> {
    let Some(mut client) = connect(paths).await else {
        return Ok(false);
    };
    client.call(&Request::Stop).await?;

    let deadline = tokio::time::Instant::now() + STOP_TIMEOUT;
    while is_running(&paths.state_dir) {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!(
                "Daemon did not stop within {} seconds",
                STOP_TIMEOUT.as_secs()
            );
        }
        tokio::time::sleep(STOP_POLL).await;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use settle_core::{WatchTarget, Watcher};
    use settle_store::MemoryStore;
    use settle_watcher::{
        ChangeNotifier, DispatchHandle, DispatchRequest, EngineConfig, ExecutionOutcome,
        Subscription, TaskExecutor, WatchError, WatchRoot,
    };
    use tokio::sync::mpsc::UnboundedSender;

    /// Never accepts work; these tests only exercise request routing
    struct NoExecutor;

    #[async_trait]
    impl TaskExecutor for NoExecutor {
        async fn dispatch(&self, _request: DispatchRequest) -> Option<DispatchHandle> {
            None
        }

        async fn await_completion(&self, _handle: &DispatchHandle) -> ExecutionOutcome {
            ExecutionOutcome::Cancelled
        }

        async fn cancel(&self, _handle: &DispatchHandle) {}
    }

    struct NoNotifier;

    impl ChangeNotifier for NoNotifier {
        fn subscribe(
            &self,
            _roots: &[WatchRoot],
            _tx: UnboundedSender<Vec<std::path::PathBuf>>,
        ) -> Result<Subscription, WatchError> {
            Ok(Subscription::new(()))
        }
    }

    fn service() -> Arc<WatcherService<MemoryStore>> {
        let engine = Engine::new(
            EngineConfig::default(),
            Arc::new(NoExecutor),
            Arc::new(FsResolver),
        );
        WatcherService::start(
            MemoryStore::new(),
            engine,
            Arc::new(NoNotifier),
            Duration::from_millis(10),
        )
        .unwrap()
    }

    #[test]
    fn test_paths_layout() {
        let paths = DaemonPaths::new("/var/lib/settle");

        assert_eq!(paths.watchers, Path::new("/var/lib/settle/watchers.json"));
        assert_eq!(paths.socket, Path::new("/var/lib/settle/daemon.sock"));
        assert_eq!(paths.logs, Path::new("/var/lib/settle/logs"));
    }

    #[tokio::test]
    async fn test_upsert_then_toggle() {
        let service = service();
        let shutdown = CancellationToken::new();
        let watcher = Watcher::new("inbox", WatchTarget::new("/tmp/inbox"));

        let created = handle_request(
            &service,
            Request::Upsert {
                watcher: watcher.clone(),
            },
            Utc::now(),
            &shutdown,
        );
        assert!(matches!(created, Response::Watcher { .. }));

        let mut renamed = watcher.clone();
        renamed.name = "mail".to_string();
        handle_request(
            &service,
            Request::Upsert { watcher: renamed },
            Utc::now(),
            &shutdown,
        );
        assert_eq!(service.list().len(), 1);
        assert_eq!(service.list()[0].name, "mail");

        match handle_request(
            &service,
            Request::SetEnabled {
                id: watcher.id,
                enabled: false,
            },
            Utc::now(),
            &shutdown,
        ) {
            Response::Watcher { watcher } => assert!(!watcher.enabled),
            other => panic!("unexpected response {:?}", other),
        }
        service.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_watcher_is_an_error_response() {
        let service = service();
        let shutdown = CancellationToken::new();

        let response = handle_request(
            &service,
            Request::Delete {
                id: settle_core::WatcherId::new(),
            },
            Utc::now(),
            &shutdown,
        );
        assert!(matches!(response, Response::Error { .. }));
        service.shutdown();
    }

    #[tokio::test]
    async fn test_stop_cancels_token() {
        let service = service();
        let shutdown = CancellationToken::new();

        let response = handle_request(&service, Request::Stop, Utc::now(), &shutdown);
        assert!(matches!(response, Response::Ok));
        assert!(shutdown.is_cancelled());
        service.shutdown();
    }

    #[tokio::test]
    async fn test_status_lists_watchers() {
        let service = service();
        let shutdown = CancellationToken::new();
        service
            .create(Watcher::new("inbox", WatchTarget::new("/tmp/inbox")))
            .unwrap();

        match handle_request(&service, Request::Status, Utc::now(), &shutdown) {
            Response::Status(status) => {
                assert_eq!(status.pid, std::process::id());
                assert_eq!(status.active_executions, 0);
                assert_eq!(status.watchers.len(), 1);
            }
            other => panic!("unexpected response {:?}", other),
        }
        service.shutdown();
    }

    #[test]
    fn test_not_running_without_lock() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        assert!(!is_running(temp_dir.path()));
    }
}
