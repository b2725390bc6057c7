//! CLI command execution helpers with automatic timing
//!
//! Every command runs against a throwaway `SETTLE_HOME`, so config, watcher
//! file, socket and lock never touch the real user directories.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Isolated settle home plus a directory to watch
pub struct TestHome {
    pub home: TempDir,
    pub watched: TempDir,
}

impl TestHome {
    pub fn new() -> Result<Self> {
        Ok(Self {
            home: TempDir::new()?,
            watched: TempDir::new()?,
        })
    }

    pub fn command(&self) -> SettleCommand {
        let mut cmd = SettleCommand::new(self.watched.path());
        cmd.env("SETTLE_HOME", &self.home.path().display().to_string());
        cmd.env("RUST_LOG", "warn");
        cmd
    }

    pub fn watched_path(&self) -> String {
        self.watched.path().display().to_string()
    }

    pub fn state_dir(&self) -> PathBuf {
        self.home.path().join("state")
    }

    /// Launch `settle start --foreground` as a child process
    pub fn spawn_daemon(&self) -> Result<DaemonProcess> {
        let child = Command::new(env!("CARGO_BIN_EXE_settle"))
            .args(["start", "--foreground"])
            .env("SETTLE_HOME", self.home.path())
            .env("RUST_LOG", "warn")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn daemon")?;
        let socket = self.state_dir().join("daemon.sock");

        let deadline = Instant::now() + Duration::from_secs(10);
        while !socket.exists() {
            if Instant::now() > deadline {
                anyhow::bail!("Daemon did not create its socket");
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        Ok(DaemonProcess { child })
    }
}

/// Killed on drop if a test fails before stopping it
pub struct DaemonProcess {
    child: Child,
}

impl DaemonProcess {
    /// Wait for the process to exit on its own
    pub fn wait_exit(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status.success());
            }
            if Instant::now() > deadline {
                anyhow::bail!("Daemon did not exit");
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// CLI command builder with timing
pub struct SettleCommand {
    working_dir: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl SettleCommand {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn args(&mut self, args: &[&str]) -> &mut Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    pub fn env(&mut self, key: &str, value: &str) -> &mut Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Execute command and return result with timing
    pub fn execute(&self) -> Result<CommandResult> {
        let start = Instant::now();

        let output = Command::new(env!("CARGO_BIN_EXE_settle"))
            .args(&self.args)
            .current_dir(&self.working_dir)
            .envs(&self.env)
            .stdin(Stdio::null())
            .output()
            .context("Failed to execute command")?;

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration: start.elapsed(),
        })
    }

    /// Execute and assert success
    pub fn assert_success(&self) -> Result<CommandResult> {
        let result = self.execute()?;

        if !result.success() {
            anyhow::bail!(
                "Command failed (exit code: {}):\nArgs: {:?}\nStdout: {}\nStderr: {}",
                result.exit_code,
                self.args,
                result.stdout,
                result.stderr
            );
        }

        Ok(result)
    }

    /// Execute and expect failure
    pub fn assert_failure(&self) -> Result<CommandResult> {
        let result = self.execute()?;

        if result.success() {
            anyhow::bail!(
                "Command should have failed but succeeded:\nArgs: {:?}\nStdout: {}",
                self.args,
                result.stdout
            );
        }

        Ok(result)
    }
}

/// Command execution result with timing
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn contains_stdout(&self, text: &str) -> bool {
        self.stdout.contains(text)
    }

    pub fn contains_stderr(&self, text: &str) -> bool {
        self.stderr.contains(text)
    }

    /// First full watcher id (26-char ULID) in stdout
    pub fn parse_watcher_id(&self) -> Option<String> {
        self.stdout.lines().find_map(extract_ulid)
    }
}

/// Extract ULID from a line of text
pub fn extract_ulid(line: &str) -> Option<String> {
    for (i, window) in line.as_bytes().windows(26).enumerate() {
        if window[0] == b'0' && window.iter().all(|b| b.is_ascii_alphanumeric()) {
            return Some(line[i..i + 26].to_string());
        }
    }
    None
}

/// Macro for convenient command construction
///
/// Usage:
/// ```ignore
/// settle!(home, "add", "inbox", &path).assert_success()?;
/// ```
#[macro_export]
macro_rules! settle {
    ($home:expr, $($arg:expr),*) => {{
        let mut cmd = $home.command();
        cmd.args(&[$($arg),*]);
        cmd
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ulid_extraction() {
        let line = "ID:             01HXKJ7NVQW3Y2YMZK5VFZX3G8";
        assert_eq!(
            extract_ulid(line),
            Some("01HXKJ7NVQW3Y2YMZK5VFZX3G8".to_string())
        );
        assert_eq!(extract_ulid("no id here"), None);
    }
}
