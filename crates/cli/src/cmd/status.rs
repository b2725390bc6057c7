//! Show daemon and watcher status

use super::Env;
use anyhow::Result;
use owo_colors::OwoColorize;
use settle_cli::data_access::WatcherAccess;
use settle_cli::ipc::{Request, Response};
use settle_cli::util;
use settle_core::WatcherPhase;

pub async fn run() -> Result<()> {
    let env = Env::load()?;
    let mut access = WatcherAccess::open(&env.paths).await?;
    let watchers = access.list()?;

    println!("{}", "Settle Status".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("State dir:     {}", env.paths.state_dir.display().to_string().cyan());

    let status = match access.client() {
        Some(client) => match client.call(&Request::Status).await? {
            Response::Status(status) => Some(status),
            _ => None,
        },
        None => None,
    };

    print!("Daemon:        ");
    match &status {
        Some(status) => {
            println!("{}", "Running ✓".green());
            println!("  PID:         {}", status.pid);
            println!(
                "  Started:     {} ({})",
                util::format_relative_time(status.started_at),
                util::format_absolute_time(status.started_at).dimmed()
            );
            println!("  Executing:   {}", status.active_executions);
        }
        None => {
            println!("{}", "Not running".yellow());
            println!("  {}", "Tip: Start with 'settle start'".dimmed());
        }
    }
    println!();

    let enabled = watchers.iter().filter(|w| w.enabled).count();
    println!("Watchers:      {} ({} enabled)", watchers.len(), enabled);

    if let Some(status) = &status {
        let busy: Vec<_> = status
            .watchers
            .iter()
            .filter(|s| s.phase != WatcherPhase::Idle)
            .collect();
        for entry in busy {
            let name = watchers
                .iter()
                .find(|w| w.id == entry.watcher_id)
                .map(|w| w.name.as_str())
                .unwrap_or("?");
            print!("  {:<20} {}", name, util::colored_phase(entry.phase));
            match &entry.run_info {
                Some(run) => println!(
                    " {}",
                    format!("(iteration {}, {} changes)", run.iteration, run.change_count)
                        .dimmed()
                ),
                None => println!(),
            }
        }
    }

    Ok(())
}
