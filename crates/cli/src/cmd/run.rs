//! Trigger a watcher immediately
//!
//! With a daemon running the request is forwarded to it. Otherwise a
//! private engine runs one convergence loop in this process and exits.

use super::Env;
use anyhow::{bail, Result};
use chrono::Utc;
use owo_colors::OwoColorize;
use settle_cli::data_access::WatcherAccess;
use settle_core::{SessionId, WatcherId};
use settle_store::{JsonStore, WatchStore};
use settle_watcher::{CommandExecutor, Engine, EngineEvent, FsResolver, LoopExit};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

pub async fn run(reference: &str) -> Result<()> {
    let env = Env::load()?;
    let mut access = WatcherAccess::open(&env.paths).await?;
    let watcher = access.resolve(reference)?;

    if !watcher.enabled {
        bail!("Watcher {} is disabled", watcher.name);
    }

    match access.run_now(watcher.id).await? {
        Some(true) => {
            println!("{} Started {}", "✓".green(), watcher.name.bold());
            return Ok(());
        }
        Some(false) => {
            println!(
                "{}",
                format!("{} is already running; nothing to do", watcher.name).yellow()
            );
            return Ok(());
        }
        None => {}
    }

    if env.config.executor.program.is_empty() {
        bail!("executor.program is not configured (see 'settle config set executor.program <cmd>')");
    }

    let executor = Arc::new(CommandExecutor::new(env.config.executor.clone()));
    let engine = Engine::new(env.config.engine_config(), executor, Arc::new(FsResolver));
    engine.set_watchers(vec![watcher.clone()]);

    let mut events = engine.subscribe();
    if !engine.run_now(watcher.id) {
        bail!("Watcher {} could not be started", watcher.name);
    }
    println!("Running {} in the foreground (Ctrl-C to cancel)", watcher.name.bold());

    let (exit, dispatches) = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(EngineEvent::ExecutionCompleted { watcher_id, session_id, .. })
                    if watcher_id == watcher.id =>
                {
                    if let Err(e) = record_completion(access.store(), watcher_id, session_id) {
                        warn!(error = %e, "Failed to record completion");
                    }
                    println!("  {} dispatch completed", "•".cyan());
                }
                Ok(EngineEvent::ExecutionFailed { watcher_id, reason }) if watcher_id == watcher.id => {
                    println!("  {} {}", "✗".red(), reason);
                }
                Ok(EngineEvent::LoopFinished { watcher_id, exit, dispatches })
                    if watcher_id == watcher.id =>
                {
                    break (exit, dispatches);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => bail!("Engine stopped unexpectedly"),
            },
            _ = tokio::signal::ctrl_c() => {
                println!("{}", "Cancelling...".dimmed());
                engine.teardown(watcher.id);
            }
        }
    };
    engine.shutdown();

    let summary = format!("{} after {} dispatch(es)", exit, dispatches);
    match exit {
        LoopExit::Converged | LoopExit::Phantom => println!("{} {}", "✓".green(), summary),
        LoopExit::IterationCap => println!(
            "{} {} (directory kept changing)",
            "!".yellow(),
            summary
        ),
        _ => bail!("Run ended: {}", summary),
    }
    Ok(())
}

fn record_completion(
    store: &JsonStore,
    id: WatcherId,
    session_id: Option<SessionId>,
) -> Result<()> {
    let Some(mut watcher) = store.load_all()?.into_iter().find(|w| w.id == id) else {
        return Ok(());
    };
    watcher.last_triggered_at = Some(Utc::now());
    if session_id.is_some() {
        watcher.last_session_id = session_id;
    }
    store.save(&watcher)?;
    Ok(())
}
