//! Configuration management command
//!
//! Provides CLI interface to view and edit system configuration.

use crate::system_config::{self, SystemConfig, KEYS};
use anyhow::{Context, Result};
use owo_colors::OwoColorize;

/// List all configuration values
pub async fn run_list() -> Result<()> {
    let config = system_config::load()?;
    let config_path =
        system_config::config_file_path().context("Could not determine config file path")?;

    println!("{}", "System Configuration".bold());
    println!("{}: {}\n", "Location".dimmed(), config_path.display().dimmed());

    let mut section = "";
    for key in KEYS {
        let (prefix, name) = key.split_once('.').unwrap_or(("", key));
        if prefix != section {
            if !section.is_empty() {
                println!();
            }
            println!("{}", format!("[{}]", prefix).yellow());
            section = prefix;
        }
        let value = config.get(key)?;
        match annotation(&config, key) {
            Some(note) => println!("  {} = {} {}", name.cyan(), value, note.dimmed()),
            None => println!("  {} = {}", name.cyan(), value),
        }
    }

    println!("\n{}", "Valid Ranges:".bold());
    println!("  engine.max_iterations: 1-50");
    println!("  engine.debounce_*_ms: 50-600,000");
    println!("  engine.notify_latency_ms: 10-5,000");
    println!("  executor.max_concurrent: 1-64");

    Ok(())
}

fn annotation(config: &SystemConfig, key: &str) -> Option<String> {
    match key {
        "daemon.state_dir" if config.daemon.state_dir.is_none() => config
            .state_dir()
            .ok()
            .map(|dir| format!("(default: {})", dir.display())),
        "executor.program" if config.executor.program.is_empty() => {
            Some("(not set: dispatches are rejected)".to_string())
        }
        "engine.debounce_fast_ms" | "engine.debounce_balanced_ms" | "engine.debounce_patient_ms" => {
            let ms: u64 = config.get(key).ok()?.parse().ok()?;
            Some(format!("({:.1}s)", ms as f64 / 1000.0))
        }
        _ => None,
    }
}

/// Get a single configuration value
pub async fn run_get(key: &str) -> Result<()> {
    let config = system_config::load()?;
    println!("{}", config.get(key)?);
    Ok(())
}

/// Set a configuration value
pub async fn run_set(key: &str, value: &str) -> Result<()> {
    let mut config = system_config::load()?;
    config.set(key, value)?;
    system_config::save(&config)?;

    println!("{} Set {} = {}", "✓".green(), key.cyan(), value);
    println!("{}", "Restart daemon for changes to take effect".dimmed());
    Ok(())
}

/// Show config file path
pub async fn run_path(create: bool) -> Result<()> {
    let config_path =
        system_config::config_file_path().context("Could not determine config file path")?;

    if create && !config_path.exists() {
        system_config::init_if_missing()?;
        println!("{} Created config file at: {}", "✓".green(), config_path.display());
    } else {
        println!("{}", config_path.display());
        if !config_path.exists() {
            println!("{}", "File does not exist. Use --create to create it.".yellow());
        }
    }

    Ok(())
}

/// Show example configuration
pub async fn run_example() -> Result<()> {
    println!("{}", system_config::example_config());
    Ok(())
}
