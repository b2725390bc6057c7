//! Watcher management commands

use super::Env;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use settle_cli::data_access::WatcherAccess;
use settle_cli::ipc::{Request, Response};
use settle_cli::util;
use settle_core::{Responsiveness, WatchTarget, Watcher, WatcherPhase};
use settle_watcher::WatcherStatus;
use std::path::{Path, PathBuf};

/// Fields shared by `add` and `edit`; `None` leaves a field untouched
#[derive(Debug, Default)]
pub struct WatcherOptions {
    pub instructions: Option<String>,
    pub agent: Option<String>,
    pub params: Vec<String>,
    pub clear_params: bool,
    pub working_folder: Option<PathBuf>,
    pub responsiveness: Option<Responsiveness>,
    pub settle_ms: Option<u64>,
    pub recursive: Option<bool>,
}

impl WatcherOptions {
    fn apply(self, watcher: &mut Watcher) -> Result<()> {
        if let Some(instructions) = self.instructions {
            watcher.instructions = instructions;
        }
        if let Some(agent) = self.agent {
            watcher.agent_id = (!agent.is_empty()).then_some(agent);
        }
        if self.clear_params {
            watcher.parameters.clear();
        }
        for raw in &self.params {
            let (key, value) = util::parse_param(raw)?;
            watcher.parameters.insert(key, value);
        }
        if let Some(folder) = self.working_folder {
            watcher.working_folder = if folder.as_os_str().is_empty() {
                None
            } else {
                Some(target_from(&folder)?)
            };
        }
        if let Some(responsiveness) = self.responsiveness {
            watcher.responsiveness = responsiveness;
        }
        if let Some(settle_ms) = self.settle_ms {
            watcher.settle_ms = settle_ms;
        }
        if let Some(recursive) = self.recursive {
            watcher.recursive = recursive;
        }
        Ok(())
    }
}

/// Store relative paths as absolute; `~` is left for the resolver
fn target_from(path: &Path) -> Result<WatchTarget> {
    if path.is_absolute() || path.starts_with("~") {
        return Ok(WatchTarget::new(path));
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(WatchTarget::new(cwd.join(path)))
}

pub async fn run_add(
    name: &str,
    path: &Path,
    options: WatcherOptions,
    disabled: bool,
) -> Result<()> {
    let env = Env::load()?;
    let mut access = WatcherAccess::open(&env.paths).await?;

    let mut watcher = Watcher::new(name, target_from(path)?);
    watcher.enabled = !disabled;
    options.apply(&mut watcher)?;

    if !watcher.target.as_path().starts_with("~") && !watcher.target.as_path().is_dir() {
        println!(
            "{} {} is not a directory yet; the watcher stays idle until it exists",
            "!".yellow(),
            watcher.target
        );
    }

    let watcher = access.upsert(watcher).await?;
    println!(
        "{} Added watcher {} ({})",
        "✓".green(),
        watcher.name.bold(),
        util::short_id(&watcher.id).yellow()
    );
    offline_hint(&access);
    Ok(())
}

pub async fn run_list() -> Result<()> {
    let env = Env::load()?;
    let mut access = WatcherAccess::open(&env.paths).await?;
    let watchers = access.list()?;
    let statuses = daemon_statuses(&mut access).await;

    if watchers.is_empty() {
        println!("{}", "No watchers yet".dimmed());
        println!("  {}", "Tip: settle add <name> <path>".dimmed());
        return Ok(());
    }

    for watcher in &watchers {
        let state = if !watcher.enabled {
            "disabled".dimmed().to_string()
        } else {
            match statuses.iter().find(|s| s.watcher_id == watcher.id) {
                Some(status) => util::colored_phase(status.phase),
                None => util::colored_phase(WatcherPhase::Idle),
            }
        };
        let last = watcher
            .last_triggered_at
            .map(util::format_relative_time)
            .unwrap_or_else(|| "never".to_string());

        println!(
            "{}  {:<20} {:<12} {}  {}",
            util::short_id(&watcher.id).yellow(),
            watcher.name,
            state,
            watcher.target.to_string().cyan(),
            format!("(last run: {})", last).dimmed()
        );
    }
    Ok(())
}

pub async fn run_show(reference: &str) -> Result<()> {
    let env = Env::load()?;
    let mut access = WatcherAccess::open(&env.paths).await?;
    let watcher = access.resolve(reference)?;
    let status = daemon_statuses(&mut access)
        .await
        .into_iter()
        .find(|s| s.watcher_id == watcher.id);

    println!("{}", watcher.name.bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("ID:             {}", watcher.id.to_string().yellow());
    println!("Path:           {}", watcher.target.to_string().cyan());
    if let Some(folder) = &watcher.working_folder {
        println!("Working folder: {}", folder);
    }
    println!(
        "Enabled:        {}",
        if watcher.enabled {
            "yes".green().to_string()
        } else {
            "no".yellow().to_string()
        }
    );
    println!("Recursive:      {}", watcher.recursive);
    println!(
        "Timing:         {} debounce, {}ms settle",
        watcher.responsiveness.label(),
        watcher.settle_ms
    );
    if let Some(agent) = &watcher.agent_id {
        println!("Agent:          {}", agent);
    }
    match watcher.last_triggered_at {
        Some(ts) => println!(
            "Last run:       {} ({})",
            util::format_relative_time(ts),
            util::format_absolute_time(ts).dimmed()
        ),
        None => println!("Last run:       {}", "never".dimmed()),
    }
    if let Some(session) = &watcher.last_session_id {
        println!("Last session:   {}", session);
    }

    if let Some(status) = status {
        println!("Phase:          {}", util::colored_phase(status.phase));
        if let Some(run) = status.run_info {
            println!(
                "  Iteration {} for {} changes, started {}",
                run.iteration,
                run.change_count,
                util::format_relative_time(run.started_at)
            );
        }
    }

    println!();
    println!("Instructions:");
    if watcher.instructions.is_empty() {
        println!("  {}", "(none)".dimmed());
    } else {
        for line in watcher.instructions.lines() {
            println!("  {}", line);
        }
    }
    if !watcher.parameters.is_empty() {
        println!("Parameters:");
        for (key, value) in &watcher.parameters {
            println!("  {} = {}", key.cyan(), value);
        }
    }
    Ok(())
}

pub async fn run_edit(
    reference: &str,
    name: Option<String>,
    path: Option<PathBuf>,
    options: WatcherOptions,
) -> Result<()> {
    let env = Env::load()?;
    let mut access = WatcherAccess::open(&env.paths).await?;
    let mut watcher = access.resolve(reference)?;

    if let Some(name) = name {
        watcher.name = name;
    }
    if let Some(path) = path {
        watcher.target = target_from(&path)?;
    }
    options.apply(&mut watcher)?;

    let watcher = access.upsert(watcher).await?;
    println!("{} Updated watcher {}", "✓".green(), watcher.name.bold());
    offline_hint(&access);
    Ok(())
}

pub async fn run_remove(reference: &str) -> Result<()> {
    let env = Env::load()?;
    let mut access = WatcherAccess::open(&env.paths).await?;
    let watcher = access.resolve(reference)?;

    access.delete(watcher.id).await?;
    println!("{} Removed watcher {}", "✓".green(), watcher.name.bold());
    Ok(())
}

pub async fn run_set_enabled(reference: &str, enabled: bool) -> Result<()> {
    let env = Env::load()?;
    let mut access = WatcherAccess::open(&env.paths).await?;
    let watcher = access.resolve(reference)?;

    if watcher.enabled == enabled {
        println!(
            "Watcher {} is already {}",
            watcher.name.bold(),
            if enabled { "enabled" } else { "disabled" }
        );
        return Ok(());
    }

    let watcher = access.set_enabled(watcher.id, enabled).await?;
    println!(
        "{} {} watcher {}",
        "✓".green(),
        if enabled { "Enabled" } else { "Disabled" },
        watcher.name.bold()
    );
    offline_hint(&access);
    Ok(())
}

/// Runtime status from the daemon; empty when none is running
async fn daemon_statuses(access: &mut WatcherAccess) -> Vec<WatcherStatus> {
    let Some(client) = access.client() else {
        return Vec::new();
    };
    match client.call(&Request::Status).await {
        Ok(Response::Status(status)) => status.watchers,
        _ => Vec::new(),
    }
}

fn offline_hint(access: &WatcherAccess) {
    if !access.daemon_connected() {
        println!(
            "{}",
            "Daemon is not running; changes apply on the next 'settle start'".dimmed()
        );
    }
}
