//! Watcher configuration and runtime value types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use ulid::Ulid;

/// Default grace period after a dispatch before re-fingerprinting
pub const DEFAULT_SETTLE_MS: u64 = 2_000;

/// Stable identity of a watcher (ULID for timestamp + uniqueness)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatcherId(Ulid);

impl WatcherId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for WatcherId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for WatcherId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

impl From<Ulid> for WatcherId {
    fn from(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

/// Correlation id of one dispatch and the session it produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Ulid);

impl SessionId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Ulid> for SessionId {
    fn from(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

/// Stored handle for a watched directory
///
/// This is the path as the user registered it (possibly `~`-relative). It is
/// only meaningful after a resolver has turned it into an absolute directory,
/// which can fail once the directory moves or disappears.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchTarget(PathBuf);

impl WatchTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// How quickly a watcher reacts once notifications stop arriving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Responsiveness {
    Fast,
    #[default]
    Balanced,
    Patient,
}

impl Responsiveness {
    pub fn label(&self) -> &'static str {
        match self {
            Responsiveness::Fast => "fast",
            Responsiveness::Balanced => "balanced",
            Responsiveness::Patient => "patient",
        }
    }
}

impl FromStr for Responsiveness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(Responsiveness::Fast),
            "balanced" => Ok(Responsiveness::Balanced),
            "patient" => Ok(Responsiveness::Patient),
            other => Err(format!(
                "unknown responsiveness '{}' (expected fast, balanced or patient)",
                other
            )),
        }
    }
}

/// Debounce window for each responsiveness setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebounceWindows {
    pub fast: Duration,
    pub balanced: Duration,
    pub patient: Duration,
}

impl DebounceWindows {
    pub fn window(&self, responsiveness: Responsiveness) -> Duration {
        match responsiveness {
            Responsiveness::Fast => self.fast,
            Responsiveness::Balanced => self.balanced,
            Responsiveness::Patient => self.patient,
        }
    }

    /// Same window for every setting (handy for tests and embedding)
    pub fn uniform(window: Duration) -> Self {
        Self {
            fast: window,
            balanced: window,
            patient: window,
        }
    }
}

impl Default for DebounceWindows {
    fn default() -> Self {
        Self {
            fast: Duration::from_secs(1),
            balanced: Duration::from_secs(3),
            patient: Duration::from_secs(10),
        }
    }
}

/// A persisted watcher: what to watch and what to ask the executor to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watcher {
    pub id: WatcherId,
    pub name: String,
    /// Instructions handed to the executor on every dispatch
    #[serde(default)]
    pub instructions: String,
    /// Persona/agent selector passed through to the executor
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    pub target: WatchTarget,
    /// Where the executor runs; the watch target when unset
    #[serde(default)]
    pub working_folder: Option<WatchTarget>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub responsiveness: Responsiveness,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default)]
    pub last_triggered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_session_id: Option<SessionId>,
}

impl Watcher {
    /// Create an enabled, recursive watcher with default timings
    pub fn new(name: impl Into<String>, target: WatchTarget) -> Self {
        Self {
            id: WatcherId::new(),
            name: name.into(),
            instructions: String::new(),
            agent_id: None,
            parameters: BTreeMap::new(),
            target,
            working_folder: None,
            enabled: true,
            recursive: true,
            responsiveness: Responsiveness::default(),
            settle_ms: DEFAULT_SETTLE_MS,
            last_triggered_at: None,
            last_session_id: None,
        }
    }

    pub fn settle_duration(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Target the executor should work in
    pub fn working_target(&self) -> &WatchTarget {
        self.working_folder.as_ref().unwrap_or(&self.target)
    }
}

fn default_true() -> bool {
    true
}

fn default_settle_ms() -> u64 {
    DEFAULT_SETTLE_MS
}

/// Runtime phase of a watcher; never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatcherPhase {
    #[default]
    Idle,
    Debouncing,
    Processing,
    Settling,
}

impl WatcherPhase {
    /// Phases in which a dispatch is in flight and notifications are ignored
    pub fn is_in_flight(&self) -> bool {
        matches!(self, WatcherPhase::Processing | WatcherPhase::Settling)
    }

    pub fn label(&self) -> &'static str {
        match self {
            WatcherPhase::Idle => "idle",
            WatcherPhase::Debouncing => "debouncing",
            WatcherPhase::Processing => "processing",
            WatcherPhase::Settling => "settling",
        }
    }
}

impl fmt::Display for WatcherPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The dispatch currently executing for a watcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherRunInfo {
    pub session_id: SessionId,
    /// Human-facing number of changed entries that prompted this dispatch
    pub change_count: usize,
    /// 1-based convergence iteration
    pub iteration: u32,
    pub started_at: DateTime<Utc>,
}
