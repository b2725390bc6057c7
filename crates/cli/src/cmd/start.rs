//! Start the daemon

use super::Env;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use settle_cli::daemon;
use std::process::{Command, Stdio};
use std::time::Duration;

pub async fn run(foreground: bool) -> Result<()> {
    let env = Env::load()?;
    if daemon::is_running(&env.paths.state_dir) {
        println!("{}", "Daemon is already running".yellow());
        return Ok(());
    }

    if foreground {
        daemon::run_foreground(env.config).await
    } else {
        start_background(&env).await
    }
}

async fn start_background(env: &Env) -> Result<()> {
    std::fs::create_dir_all(&env.paths.logs).context("Failed to create logs directory")?;

    let exe = std::env::current_exe().context("Failed to get current executable path")?;

    // The detached daemon logs through its own rolling appender
    Command::new("nohup")
        .arg(&exe)
        .arg("start")
        .arg("--foreground")
        .arg("--detached")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("Failed to spawn daemon process")?;

    tokio::time::sleep(Duration::from_millis(500)).await;

    if daemon::is_running(&env.paths.state_dir) {
        println!("{} Daemon started", "✓".green());
        println!("Logs: {}", env.paths.logs.display());
        Ok(())
    } else {
        anyhow::bail!(
            "Daemon failed to start (check logs in {})",
            env.paths.logs.display()
        );
    }
}
