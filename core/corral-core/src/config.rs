//! Configuration and path layout for corral.
//!
//! All path decisions are centralized in [`CoordHome`] so tests can inject a
//! temp root. The declarative configuration is a TOML file loaded once at
//! startup; a missing file means defaults, a malformed file logs a warning
//! and falls back to defaults rather than blocking the host process.

use std::env;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::Deserialize;
use tracing::warn;

const HOME_ENV: &str = "CORRAL_HOME";
const CONFIG_FILE: &str = "config.toml";

/// Root directory for all corral data (default: `~/.corral`, overridable
/// via `CORRAL_HOME` for tests and alternate deployments).
#[derive(Debug, Clone)]
pub struct CoordHome {
    root: PathBuf,
}

impl CoordHome {
    pub fn resolve() -> Result<Self, crate::error::CoordError> {
        if let Ok(root) = env::var(HOME_ENV) {
            if !root.trim().is_empty() {
                return Ok(Self { root: PathBuf::from(root) });
            }
        }
        let home = dirs::home_dir().ok_or(crate::error::CoordError::HomeDirNotFound)?;
        Ok(Self {
            root: home.join(".corral"),
        })
    }

    /// Creates a CoordHome with a custom root directory.
    /// Used for testing with temp directories.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Shared coordination store database on the shared filesystem.
    pub fn store_file(&self) -> PathBuf {
        self.root.join("store.db")
    }

    /// Append-only history log partitions, one file per UTC date.
    pub fn history_dir(&self) -> PathBuf {
        self.root.join("history")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

/// How the pre-operation gate treats a conflicting acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictAction {
    /// Refuse the operation and surface the conflict (default).
    Block,
    /// Proceed without a lease but log the conflict.
    Warn,
    /// Skip the conflict check entirely (trusted automation only).
    Proceed,
}

impl Default for ConflictAction {
    fn default() -> Self {
        Self::Block
    }
}

/// Per-resource-pattern TTL override. The first pattern matching the
/// normalized resource path wins.
#[derive(Debug, Clone, Deserialize)]
pub struct TtlOverride {
    pub pattern: String,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Heartbeat age after which an active session is considered stale.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Default lease TTL.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    /// Interval for the periodic sweep in the heartbeat holder.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default)]
    pub conflict_action: ConflictAction,

    #[serde(default)]
    pub ttl_overrides: Vec<TtlOverride>,

    /// Allows a strictly higher-priority acquirer to force-break a lease.
    #[serde(default)]
    pub preemption_enabled: bool,

    #[serde(default = "default_true")]
    pub notify_conflicts: bool,

    /// Overrides the store database path (defaults to `<root>/store.db`).
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Overrides the history partition directory.
    #[serde(default)]
    pub history_dir: Option<PathBuf>,
}

fn default_session_timeout_secs() -> u64 {
    7200
}

fn default_heartbeat_interval_secs() -> u64 {
    60
}

fn default_lock_timeout_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_timeout_secs: default_session_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            lock_timeout_secs: default_lock_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            conflict_action: ConflictAction::default(),
            ttl_overrides: Vec::new(),
            preemption_enabled: false,
            notify_conflicts: true,
            store_path: None,
            history_dir: None,
        }
    }
}

impl Config {
    /// Loads configuration from the given path. Missing file means defaults;
    /// unreadable or malformed content logs a warning and means defaults.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        let content = match fs_err::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Failed to read config; using defaults");
                return Self::default();
            }
        };
        match toml::from_str::<Config>(&content) {
            Ok(config) => config,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Malformed config; using defaults");
                Self::default()
            }
        }
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::seconds(self.session_timeout_secs as i64)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::seconds(self.heartbeat_interval_secs as i64)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::seconds(self.lock_timeout_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::seconds(self.sweep_interval_secs as i64)
    }
}
