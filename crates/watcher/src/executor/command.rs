//! Executor that runs an external program per dispatch
//!
//! The rendered prompt goes to the program's stdin; dispatch metadata is
//! exported as `SETTLE_*` environment variables. Exit status 0 counts as
//! completion.

use super::{render_prompt, DispatchHandle, DispatchKind, DispatchRequest, ExecutionOutcome, TaskExecutor};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

/// Keep this much of stderr for failure reasons
const STDERR_TAIL: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Program to run; dispatches are rejected while this is empty
    pub program: String,
    pub args: Vec<String>,
    /// Dispatches allowed to run at once across all watchers
    pub max_concurrent: usize,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            max_concurrent: 2,
        }
    }
}

/// A started program; dropped from the map by its own wait task
struct Run {
    kill: CancellationToken,
    /// `None` until the program is gone; any number of waiters may watch it
    done: watch::Receiver<Option<ExecutionOutcome>>,
}

pub struct CommandExecutor {
    config: CommandConfig,
    permits: Arc<Semaphore>,
    runs: Arc<DashMap<Ulid, Run>>,
}

impl CommandExecutor {
    pub fn new(config: CommandConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            permits,
            runs: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &CommandConfig {
        &self.config
    }

    /// Number of dispatches currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrent.max(1) - self.permits.available_permits()
    }

    fn build_command(&self, request: &DispatchRequest) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .current_dir(&request.working_folder)
            .env("SETTLE_WATCHER_ID", request.watcher_id.to_string())
            .env("SETTLE_WATCHER_NAME", &request.watcher_name)
            .env("SETTLE_SESSION_ID", request.session_id.to_string())
            .env("SETTLE_ITERATION", request.iteration.to_string())
            .env("SETTLE_WATCH_PATH", &request.watch_path)
            .env(
                "SETTLE_DISPATCH_KIND",
                match request.kind {
                    DispatchKind::Initial => "initial",
                    DispatchKind::FollowUp => "follow-up",
                },
            )
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(agent_id) = &request.agent_id {
            cmd.env("SETTLE_AGENT_ID", agent_id);
        }
        for (key, value) in &request.parameters {
            cmd.env(param_env_name(key), value);
        }

        cmd
    }
}

fn param_env_name(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("SETTLE_PARAM_{}", sanitized)
}

fn stderr_tail(stderr: &str) -> &str {
    let trimmed = stderr.trim_end();
    if trimmed.len() <= STDERR_TAIL {
        return trimmed;
    }
    let mut start = trimmed.len() - STDERR_TAIL;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    async fn dispatch(&self, request: DispatchRequest) -> Option<DispatchHandle> {
        if self.config.program.is_empty() {
            warn!(watcher = %request.watcher_id, "No executor program configured, rejecting dispatch");
            return None;
        }

        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!(watcher = %request.watcher_id, "Executor at capacity, rejecting dispatch");
                return None;
            }
        };

        let mut child = match self.build_command(&request).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(
                    watcher = %request.watcher_id,
                    program = %self.config.program,
                    error = %e,
                    "Failed to start executor program"
                );
                return None;
            }
        };

        let handle = DispatchHandle {
            id: Ulid::new(),
            watcher_id: request.watcher_id,
            session_id: request.session_id,
        };
        let kill = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);
        self.runs.insert(
            handle.id,
            Run {
                kill: kill.clone(),
                done: done_rx,
            },
        );

        let prompt = render_prompt(&request);
        if let Some(mut stdin) = child.stdin.take() {
            // Separate task: a program that never reads stdin must not stall us
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    debug!(error = %e, "Executor program closed stdin early");
                }
            });
        }
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let program = self.config.program.clone();
        let runs = Arc::clone(&self.runs);
        let dispatch_id = handle.id;
        let session_id = handle.session_id;
        let watcher_id = handle.watcher_id;
        info!(watcher = %watcher_id, session = %session_id, program = %program, "Dispatch started");

        tokio::spawn(async move {
            let outcome = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => ExecutionOutcome::Completed {
                        session_id: Some(session_id),
                    },
                    Ok(status) => {
                        let stderr = match stderr_task {
                            Some(task) => task.await.unwrap_or_default(),
                            None => String::new(),
                        };
                        let tail = stderr_tail(&stderr);
                        ExecutionOutcome::Failed {
                            reason: if tail.is_empty() {
                                format!("{} exited with {}", program, status)
                            } else {
                                format!("{} exited with {}: {}", program, status, tail)
                            },
                        }
                    }
                    Err(e) => ExecutionOutcome::Failed {
                        reason: format!("failed to wait for {}: {}", program, e),
                    },
                },
                _ = kill.cancelled() => {
                    if let Err(e) = child.kill().await {
                        debug!(watcher = %watcher_id, error = %e, "Executor program already gone");
                    }
                    ExecutionOutcome::Cancelled
                }
            };

            runs.remove(&dispatch_id);
            drop(permit);
            done_tx.send_replace(Some(outcome));
        });

        Some(handle)
    }

    async fn await_completion(&self, handle: &DispatchHandle) -> ExecutionOutcome {
        let done = self.runs.get(&handle.id).map(|run| run.done.clone());
        let Some(mut done) = done else {
            return ExecutionOutcome::Failed {
                reason: format!("unknown dispatch {}", handle.id),
            };
        };

        let outcome = done
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|outcome| outcome.clone());
        outcome.unwrap_or_else(|| ExecutionOutcome::Failed {
            reason: "executor task ended unexpectedly".to_string(),
        })
    }

    async fn cancel(&self, handle: &DispatchHandle) {
        if let Some(run) = self.runs.get(&handle.id) {
            run.kill.cancel();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use settle_core::{FingerprintDiff, SessionId, WatcherId};
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;

    fn shell(script: &str, max_concurrent: usize) -> CommandExecutor {
        CommandExecutor::new(CommandConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            max_concurrent,
        })
    }

    fn request(dir: &TempDir) -> DispatchRequest {
        DispatchRequest {
            watcher_id: WatcherId::new(),
            watcher_name: "inbox".to_string(),
            session_id: SessionId::new(),
            agent_id: Some("organizer".to_string()),
            instructions: "tidy up".to_string(),
            parameters: BTreeMap::from([("dest-dir".to_string(), "archive".to_string())]),
            watch_path: dir.path().to_path_buf(),
            working_folder: dir.path().to_path_buf(),
            iteration: 1,
            kind: DispatchKind::Initial,
            diff: FingerprintDiff::default(),
        }
    }

    #[tokio::test]
    async fn test_successful_run_completes_with_session() {
        let dir = TempDir::new().unwrap();
        let executor = shell(
            r#"cat > prompt.txt && test "$SETTLE_AGENT_ID" = organizer && test "$SETTLE_PARAM_DEST_DIR" = archive"#,
            1,
        );
        let req = request(&dir);
        let session = req.session_id;

        let handle = executor.dispatch(req).await.unwrap();
        let outcome = executor.await_completion(&handle).await;

        assert_eq!(
            outcome,
            ExecutionOutcome::Completed {
                session_id: Some(session)
            }
        );
        let prompt = std::fs::read_to_string(dir.path().join("prompt.txt")).unwrap();
        assert!(prompt.contains("tidy up"));
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let dir = TempDir::new().unwrap();
        let executor = shell("echo boom >&2; exit 3", 1);

        let handle = executor.dispatch(request(&dir)).await.unwrap();
        match executor.await_completion(&handle).await {
            ExecutionOutcome::Failed { reason } => assert!(reason.contains("boom")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_capacity_exhaustion_rejects() {
        let dir = TempDir::new().unwrap();
        let executor = shell("sleep 30", 1);

        let first = executor.dispatch(request(&dir)).await.unwrap();
        assert!(executor.dispatch(request(&dir)).await.is_none());

        executor.cancel(&first).await;
        let outcome = tokio::time::timeout(Duration::from_secs(5), executor.await_completion(&first))
            .await
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_unconfigured_program_rejects() {
        let dir = TempDir::new().unwrap();
        let executor = CommandExecutor::new(CommandConfig::default());

        assert!(executor.dispatch(request(&dir)).await.is_none());
    }

    #[tokio::test]
    async fn test_abandoned_wait_then_cancel_reaps_child() {
        let dir = TempDir::new().unwrap();
        let executor = shell("sleep 30", 1);
        let handle = executor.dispatch(request(&dir)).await.unwrap();

        // A waiter that gives up must not stop the next one from seeing the end
        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), executor.await_completion(&handle)).await;
        assert!(abandoned.is_err());

        executor.cancel(&handle).await;
        let outcome = tokio::time::timeout(Duration::from_secs(5), executor.await_completion(&handle))
            .await
            .unwrap();

        assert_eq!(outcome, ExecutionOutcome::Cancelled);
        assert!(executor.runs.is_empty());
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_waiters_see_same_outcome() {
        let dir = TempDir::new().unwrap();
        let executor = shell("exit 0", 1);
        let handle = executor.dispatch(request(&dir)).await.unwrap();

        let (first, second) = tokio::join!(
            executor.await_completion(&handle),
            executor.await_completion(&handle)
        );

        assert_eq!(first, second);
        assert!(matches!(first, ExecutionOutcome::Completed { .. }));
        assert!(executor.runs.is_empty());
    }

    #[test]
    fn test_param_env_name() {
        assert_eq!(param_env_name("dest-dir"), "SETTLE_PARAM_DEST_DIR");
        assert_eq!(param_env_name("style"), "SETTLE_PARAM_STYLE");
    }
}
