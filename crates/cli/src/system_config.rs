//! System configuration (`~/.config/settle/config.toml`)
//!
//! Missing file means defaults. Every load validates, so a hand-edited
//! file with out-of-range values is reported instead of silently used.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use settle_core::{DebounceWindows, IgnoreConfig, SignatureMode};
use settle_watcher::{CommandConfig, EngineConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides both the config directory and the default state directory
pub const HOME_ENV: &str = "SETTLE_HOME";

pub const WATCHERS_FILE: &str = "watchers.json";
pub const SOCKET_FILE: &str = "daemon.sock";
pub const LOGS_DIR: &str = "logs";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub daemon: DaemonConfig,
    pub engine: EngineSection,
    pub executor: CommandConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Where watchers, the socket, lock and logs live
    pub state_dir: Option<PathBuf>,
    /// Default tracing filter; `RUST_LOG` wins when set
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub max_iterations: u32,
    pub debounce_fast_ms: u64,
    pub debounce_balanced_ms: u64,
    pub debounce_patient_ms: u64,
    /// OS event coalescing window
    pub notify_latency_ms: u64,
    pub signature: SignatureMode,
    pub use_ignore_file: bool,
    pub ignore_patterns: Vec<String>,
}

impl Default for EngineSection {
    fn default() -> Self {
        let windows = DebounceWindows::default();
        Self {
            max_iterations: settle_watcher::DEFAULT_MAX_ITERATIONS,
            debounce_fast_ms: windows.fast.as_millis() as u64,
            debounce_balanced_ms: windows.balanced.as_millis() as u64,
            debounce_patient_ms: windows.patient.as_millis() as u64,
            notify_latency_ms: 200,
            signature: SignatureMode::default(),
            use_ignore_file: true,
            ignore_patterns: Vec::new(),
        }
    }
}

const MAX_ITERATIONS_RANGE: (u32, u32) = (1, 50);
const DEBOUNCE_RANGE_MS: (u64, u64) = (50, 600_000);
const LATENCY_RANGE_MS: (u64, u64) = (10, 5_000);
const CONCURRENCY_RANGE: (usize, usize) = (1, 64);

/// Every key `config get/set` understands
pub const KEYS: &[&str] = &[
    "daemon.state_dir",
    "daemon.log_level",
    "engine.max_iterations",
    "engine.debounce_fast_ms",
    "engine.debounce_balanced_ms",
    "engine.debounce_patient_ms",
    "engine.notify_latency_ms",
    "engine.signature",
    "engine.use_ignore_file",
    "engine.ignore_patterns",
    "executor.program",
    "executor.args",
    "executor.max_concurrent",
];

impl SystemConfig {
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        check_range("engine.max_iterations", engine.max_iterations, MAX_ITERATIONS_RANGE)?;
        check_range("engine.debounce_fast_ms", engine.debounce_fast_ms, DEBOUNCE_RANGE_MS)?;
        check_range(
            "engine.debounce_balanced_ms",
            engine.debounce_balanced_ms,
            DEBOUNCE_RANGE_MS,
        )?;
        check_range(
            "engine.debounce_patient_ms",
            engine.debounce_patient_ms,
            DEBOUNCE_RANGE_MS,
        )?;
        check_range("engine.notify_latency_ms", engine.notify_latency_ms, LATENCY_RANGE_MS)?;
        check_range(
            "executor.max_concurrent",
            self.executor.max_concurrent,
            CONCURRENCY_RANGE,
        )?;

        if self.daemon.log_level.trim().is_empty() {
            bail!("daemon.log_level must not be empty");
        }
        Ok(())
    }

    /// Engine settings; the state directory is never fingerprinted, so a
    /// watcher over a tree that contains it can still converge
    pub fn engine_config(&self) -> EngineConfig {
        let excluded_paths = self
            .state_dir()
            .ok()
            .map(|dir| dir.canonicalize().unwrap_or(dir))
            .into_iter()
            .collect();

        EngineConfig {
            max_iterations: self.engine.max_iterations,
            debounce: DebounceWindows {
                fast: Duration::from_millis(self.engine.debounce_fast_ms),
                balanced: Duration::from_millis(self.engine.debounce_balanced_ms),
                patient: Duration::from_millis(self.engine.debounce_patient_ms),
            },
            signature: self.engine.signature,
            ignore: IgnoreConfig {
                use_ignore_file: self.engine.use_ignore_file,
                additional_patterns: self.engine.ignore_patterns.clone(),
            },
            excluded_paths,
            ..EngineConfig::default()
        }
    }

    pub fn notify_latency(&self) -> Duration {
        Duration::from_millis(self.engine.notify_latency_ms)
    }

    /// State directory: configured, `$SETTLE_HOME/state`, or the platform data dir
    pub fn state_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.daemon.state_dir {
            return Ok(dir.clone());
        }
        if let Some(home) = std::env::var_os(HOME_ENV) {
            return Ok(PathBuf::from(home).join("state"));
        }
        dirs::data_dir()
            .map(|dir| dir.join("settle"))
            .context("Could not determine a state directory; set daemon.state_dir")
    }

    pub fn get(&self, key: &str) -> Result<String> {
        let value = match key {
            "daemon.state_dir" => self
                .daemon
                .state_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            "daemon.log_level" => self.daemon.log_level.clone(),
            "engine.max_iterations" => self.engine.max_iterations.to_string(),
            "engine.debounce_fast_ms" => self.engine.debounce_fast_ms.to_string(),
            "engine.debounce_balanced_ms" => self.engine.debounce_balanced_ms.to_string(),
            "engine.debounce_patient_ms" => self.engine.debounce_patient_ms.to_string(),
            "engine.notify_latency_ms" => self.engine.notify_latency_ms.to_string(),
            "engine.signature" => signature_label(self.engine.signature).to_string(),
            "engine.use_ignore_file" => self.engine.use_ignore_file.to_string(),
            "engine.ignore_patterns" => self.engine.ignore_patterns.join(","),
            "executor.program" => self.executor.program.clone(),
            "executor.args" => self.executor.args.join(" "),
            "executor.max_concurrent" => self.executor.max_concurrent.to_string(),
            _ => bail!(
                "Unknown config key: {}. Use 'settle config list' to see available keys.",
                key
            ),
        };
        Ok(value)
    }

    /// Set one key; the result is validated before it is kept
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut updated = self.clone();
        match key {
            "daemon.state_dir" => {
                updated.daemon.state_dir = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            "daemon.log_level" => updated.daemon.log_level = value.to_string(),
            "engine.max_iterations" => updated.engine.max_iterations = parse_number(value)?,
            "engine.debounce_fast_ms" => updated.engine.debounce_fast_ms = parse_number(value)?,
            "engine.debounce_balanced_ms" => {
                updated.engine.debounce_balanced_ms = parse_number(value)?
            }
            "engine.debounce_patient_ms" => {
                updated.engine.debounce_patient_ms = parse_number(value)?
            }
            "engine.notify_latency_ms" => updated.engine.notify_latency_ms = parse_number(value)?,
            "engine.signature" => {
                updated.engine.signature = match value {
                    "metadata" => SignatureMode::Metadata,
                    "content-hash" => SignatureMode::ContentHash,
                    _ => bail!("Invalid value: must be 'metadata' or 'content-hash'"),
                }
            }
            "engine.use_ignore_file" => {
                updated.engine.use_ignore_file = value
                    .parse()
                    .context("Invalid value: must be 'true' or 'false'")?
            }
            "engine.ignore_patterns" => {
                updated.engine.ignore_patterns = value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect()
            }
            "executor.program" => updated.executor.program = value.to_string(),
            "executor.args" => {
                updated.executor.args = value.split_whitespace().map(String::from).collect()
            }
            "executor.max_concurrent" => updated.executor.max_concurrent = parse_number(value)?,
            _ => bail!(
                "Unknown config key: {}. Use 'settle config list' to see available keys.",
                key
            ),
        }

        updated.validate().context("Invalid configuration value")?;
        *self = updated;
        Ok(())
    }
}

fn check_range<T: PartialOrd + std::fmt::Display>(key: &str, value: T, (min, max): (T, T)) -> Result<()> {
    if value < min || value > max {
        bail!("{} must be between {} and {} (got {})", key, min, max, value);
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid value '{}': must be a positive integer", value))
}

pub fn signature_label(mode: SignatureMode) -> &'static str {
    match mode {
        SignatureMode::Metadata => "metadata",
        SignatureMode::ContentHash => "content-hash",
    }
}

/// `$SETTLE_HOME/config.toml` or `~/.config/settle/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    if let Some(home) = std::env::var_os(HOME_ENV) {
        return Some(PathBuf::from(home).join("config.toml"));
    }
    dirs::config_dir().map(|dir| dir.join("settle").join("config.toml"))
}

pub fn load() -> Result<SystemConfig> {
    let path = config_file_path().context("Could not determine config file path")?;
    load_from(&path)
}

pub fn load_from(path: &Path) -> Result<SystemConfig> {
    let config = match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str::<SystemConfig>(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => SystemConfig::default(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

pub fn save(config: &SystemConfig) -> Result<()> {
    let path = config_file_path().context("Could not determine config file path")?;
    save_to(config, &path)
}

pub fn save_to(config: &SystemConfig, path: &Path) -> Result<()> {
    config.validate()?;
    let contents = toml::to_string_pretty(config).context("Failed to serialize configuration")?;

    let parent = path.parent().context("Config path has no parent directory")?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create {}", parent.display()))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).context("Failed to create temp file")?;
    std::io::Write::write_all(&mut temp, contents.as_bytes())?;
    temp.persist(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Write the default configuration if no file exists yet
pub fn init_if_missing() -> Result<PathBuf> {
    let path = config_file_path().context("Could not determine config file path")?;
    if !path.exists() {
        save_to(&SystemConfig::default(), &path)?;
    }
    Ok(path)
}

pub fn example_config() -> &'static str {
    r#"# settle configuration
# Location: ~/.config/settle/config.toml (or $SETTLE_HOME/config.toml)

[daemon]
# state_dir = "/home/me/.local/share/settle"
log_level = "info"

[engine]
# Dispatches allowed per trigger before giving up on convergence (1-50)
max_iterations = 5
# Quiet period before a watcher reacts, per responsiveness (50-600000 ms)
debounce_fast_ms = 1000
debounce_balanced_ms = 3000
debounce_patient_ms = 10000
# OS event coalescing window (10-5000 ms)
notify_latency_ms = 200
# "metadata" (size + mtime) or "content-hash" (adds BLAKE3 of contents)
signature = "metadata"
use_ignore_file = true
ignore_patterns = ["*.part", "*.crdownload"]

[executor]
# Program run for every dispatch; the prompt arrives on stdin
program = "my-agent"
args = ["--non-interactive"]
max_concurrent = 2
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = SystemConfig::default();
        config.validate().unwrap();

        let engine = config.engine_config();
        assert_eq!(engine.max_iterations, 5);
        assert_eq!(engine.debounce, DebounceWindows::default());
    }

    #[test]
    fn test_engine_config_excludes_state_dir() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = SystemConfig::default();
        config.daemon.state_dir = Some(temp_dir.path().to_path_buf());

        let engine = config.engine_config();
        assert_eq!(
            engine.excluded_paths,
            vec![temp_dir.path().canonicalize().unwrap()]
        );
    }

    #[test]
    fn test_missing_file_is_default() {
        let temp_dir = TempDir::new().unwrap();
        let config = load_from(&temp_dir.path().join("config.toml")).unwrap();
        assert_eq!(config, SystemConfig::default());
    }

    #[test]
    fn test_example_parses() {
        let config: SystemConfig = toml::from_str(example_config()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.executor.program, "my-agent");
        assert_eq!(config.engine.ignore_patterns.len(), 2);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[engine]\nmax_iterations = 8\n").unwrap();

        let config = load_from(&path).unwrap();
        assert_eq!(config.engine.max_iterations, 8);
        assert_eq!(config.engine.debounce_balanced_ms, 3000);
        assert_eq!(config.daemon.log_level, "info");
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[engine]\nmax_iterations = 0\n").unwrap();
        assert!(load_from(&path).is_err());

        let mut config = SystemConfig::default();
        assert!(config.set("engine.notify_latency_ms", "1").is_err());
        assert!(config.set("executor.max_concurrent", "65").is_err());
        assert!(config.set("engine.debounce_fast_ms", "600001").is_err());
        // Rejected sets leave the config untouched
        assert_eq!(config, SystemConfig::default());
    }

    #[test]
    fn test_get_set_round_trip() {
        let mut config = SystemConfig::default();

        for key in KEYS {
            assert!(config.get(key).is_ok(), "{} should be readable", key);
        }

        config.set("engine.signature", "content-hash").unwrap();
        config.set("executor.args", "--fast  --quiet").unwrap();
        config.set("engine.ignore_patterns", "*.tmp, *.part").unwrap();

        assert_eq!(config.engine.signature, SignatureMode::ContentHash);
        assert_eq!(config.get("executor.args").unwrap(), "--fast --quiet");
        assert_eq!(config.engine.ignore_patterns, vec!["*.tmp", "*.part"]);
        assert!(config.set("engine.signature", "sha1").is_err());
        assert!(config.get("gc.retain_count").is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = SystemConfig::default();
        config.set("executor.program", "organize").unwrap();
        save_to(&config, &path).unwrap();

        assert_eq!(load_from(&path).unwrap(), config);
    }
}
