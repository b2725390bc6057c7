//! CLI command implementations

pub mod config;
pub mod run;
pub mod start;
pub mod status;
pub mod stop;
pub mod watchers;

use anyhow::Result;
use settle_cli::daemon::DaemonPaths;
use settle_cli::system_config::{self, SystemConfig};

/// Loaded configuration plus the state paths derived from it
pub struct Env {
    pub config: SystemConfig,
    pub paths: DaemonPaths,
}

impl Env {
    pub fn load() -> Result<Self> {
        let config = system_config::load()?;
        let paths = DaemonPaths::from_config(&config)?;
        Ok(Self { config, paths })
    }
}
