//! Settle CLI - settle command

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use settle_cli::daemon::DaemonPaths;
use settle_cli::system_config;
use settle_core::Responsiveness;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cmd;

use cmd::watchers::WatcherOptions;

/// Settle - run an agent whenever a folder changes, until it stops changing
#[derive(Parser)]
#[command(name = "settle")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a watcher for a directory
    Add {
        /// Display name
        name: String,
        /// Directory to watch
        path: PathBuf,
        #[command(flatten)]
        options: OptionArgs,
        /// Only watch the top level of the directory
        #[arg(long)]
        non_recursive: bool,
        /// Create the watcher disabled
        #[arg(long)]
        disabled: bool,
    },
    /// List watchers
    List,
    /// Show one watcher in detail
    Show {
        /// Watcher id, id prefix or name
        watcher: String,
    },
    /// Change an existing watcher
    Edit {
        /// Watcher id, id prefix or name
        watcher: String,
        /// New display name
        #[arg(long)]
        name: Option<String>,
        /// New directory to watch
        #[arg(long)]
        path: Option<PathBuf>,
        #[command(flatten)]
        options: OptionArgs,
        /// Watch subdirectories too
        #[arg(long)]
        recursive: Option<bool>,
        /// Drop all parameters before applying --param
        #[arg(long)]
        clear_params: bool,
    },
    /// Delete a watcher
    Remove {
        /// Watcher id, id prefix or name
        watcher: String,
    },
    /// Enable a watcher
    Enable {
        /// Watcher id, id prefix or name
        watcher: String,
    },
    /// Disable a watcher, cancelling anything it is running
    Disable {
        /// Watcher id, id prefix or name
        watcher: String,
    },
    /// Run a watcher now, regardless of pending changes
    Run {
        /// Watcher id, id prefix or name
        watcher: String,
    },
    /// Show daemon and watcher status
    Status,
    /// Start the daemon
    Start {
        /// Run in foreground (for debugging)
        #[arg(long)]
        foreground: bool,
        /// Log to the state directory instead of stderr
        #[arg(long, hide = true)]
        detached: bool,
    },
    /// Stop the daemon
    Stop,
    /// View or edit system configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Args)]
struct OptionArgs {
    /// Instructions passed to the executor on every run
    #[arg(long)]
    instructions: Option<String>,
    /// Agent selector passed to the executor (empty to clear)
    #[arg(long)]
    agent: Option<String>,
    /// Executor parameter as key=value (repeatable)
    #[arg(long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,
    /// Directory the executor works in (empty to use the watched path)
    #[arg(long)]
    working_folder: Option<PathBuf>,
    /// Debounce preset: fast, balanced or patient
    #[arg(long)]
    responsiveness: Option<Responsiveness>,
    /// Quiet period after a dispatch before re-checking, in milliseconds
    #[arg(long)]
    settle_ms: Option<u64>,
}

impl OptionArgs {
    fn into_options(self, recursive: Option<bool>, clear_params: bool) -> WatcherOptions {
        WatcherOptions {
            instructions: self.instructions,
            agent: self.agent,
            params: self.params,
            clear_params,
            working_folder: self.working_folder,
            responsiveness: self.responsiveness,
            settle_ms: self.settle_ms,
            recursive,
        }
    }
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// List all configuration values
    List,
    /// Get one value
    Get { key: String },
    /// Set one value
    Set {
        key: String,
        #[arg(allow_hyphen_values = true)]
        value: String,
    },
    /// Show the config file path
    Path {
        /// Write a default config file if none exists
        #[arg(long)]
        create: bool,
    },
    /// Print an annotated example configuration
    Example,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (daemon, detached) = match cli.command {
        Commands::Start { detached, .. } => (true, detached),
        _ => (false, false),
    };
    let _guard = init_tracing(daemon, detached);

    match cli.command {
        Commands::Add {
            name,
            path,
            options,
            non_recursive,
            disabled,
        } => {
            let options = options.into_options(non_recursive.then_some(false), false);
            cmd::watchers::run_add(&name, &path, options, disabled).await
        }
        Commands::List => cmd::watchers::run_list().await,
        Commands::Show { watcher } => cmd::watchers::run_show(&watcher).await,
        Commands::Edit {
            watcher,
            name,
            path,
            options,
            recursive,
            clear_params,
        } => {
            let options = options.into_options(recursive, clear_params);
            cmd::watchers::run_edit(&watcher, name, path, options).await
        }
        Commands::Remove { watcher } => cmd::watchers::run_remove(&watcher).await,
        Commands::Enable { watcher } => cmd::watchers::run_set_enabled(&watcher, true).await,
        Commands::Disable { watcher } => cmd::watchers::run_set_enabled(&watcher, false).await,
        Commands::Run { watcher } => cmd::run::run(&watcher).await,
        Commands::Status => cmd::status::run().await,
        Commands::Start { foreground, .. } => cmd::start::run(foreground).await,
        Commands::Stop => cmd::stop::run().await,
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::List => cmd::config::run_list().await,
            ConfigCommands::Get { key } => cmd::config::run_get(&key).await,
            ConfigCommands::Set { key, value } => cmd::config::run_set(&key, &value).await,
            ConfigCommands::Path { create } => cmd::config::run_path(create).await,
            ConfigCommands::Example => cmd::config::run_example().await,
        },
    }
}

/// `RUST_LOG` wins; otherwise the configured daemon level for the daemon
/// and warnings only for everything else
///
/// A detached daemon writes to a daily-rolling file under the state
/// directory. The returned guard flushes it and must live until exit.
fn init_tracing(daemon: bool, detached: bool) -> Option<WorkerGuard> {
    let config = system_config::load().ok();
    let level = match &config {
        Some(c) if daemon => c.daemon.log_level.clone(),
        _ if daemon => "info".to_string(),
        _ => "warn".to_string(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let log_dir = detached
        .then(|| config.as_ref().and_then(|c| DaemonPaths::from_config(c).ok()))
        .flatten()
        .map(|paths| paths.logs);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "daemon.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_add_with_params() {
        let cli = Cli::try_parse_from([
            "settle",
            "add",
            "scans",
            "/tmp/scans",
            "--param",
            "dest=~/Sorted",
            "--param",
            "style=short",
            "--responsiveness",
            "fast",
            "--non-recursive",
        ])
        .unwrap();

        match cli.command {
            Commands::Add {
                name,
                options,
                non_recursive,
                ..
            } => {
                assert_eq!(name, "scans");
                assert_eq!(options.params.len(), 2);
                assert_eq!(options.responsiveness, Some(Responsiveness::Fast));
                assert!(non_recursive);
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn test_unknown_responsiveness_rejected() {
        assert!(Cli::try_parse_from([
            "settle",
            "add",
            "scans",
            "/tmp/scans",
            "--responsiveness",
            "instant",
        ])
        .is_err());
    }
}
