//! Stop the daemon

use super::Env;
use anyhow::Result;
use owo_colors::OwoColorize;

pub async fn run() -> Result<()> {
    let env = Env::load()?;
    if settle_cli::daemon::stop(&env.paths).await? {
        println!("{} Daemon stopped", "✓".green());
    } else {
        println!("{}", "Daemon is not running".yellow());
    }
    Ok(())
}
