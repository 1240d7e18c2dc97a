//! Configuration loading
//!
//! Values come from (lowest to highest precedence) built-in defaults, an
//! optional TOML file, and command-line flags applied by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, SyncError};

/// Default relay address, used both to listen (server) and to connect (client)
pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:8007";

/// Default local broadcast port
pub const DEFAULT_BROADCAST_PORT: u16 = 51234;

/// Name of the store's internal metadata directory
pub const DEFAULT_METADATA_DIR: &str = ".git";

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory to keep in sync. Must already be a git clone with a remote.
    #[serde(default = "default_sync_dir")]
    pub sync_dir: PathBuf,
    /// Relay server to connect to (client mode)
    #[serde(default)]
    pub server_addr: Option<String>,
    /// Address the relay server listens on (server mode)
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Directory for treesync.log
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Metadata directory name excluded from watching
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: String,
    /// Git remote name
    #[serde(default = "default_remote")]
    pub remote: String,
    /// Git branch merged from the remote
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Helper invoked with informational messages
    #[serde(default = "default_info_cmd")]
    pub info_cmd: String,
    /// Helper invoked with warnings
    #[serde(default = "default_alert_cmd")]
    pub alert_cmd: String,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub timings: Timings,
}

/// Local subnet broadcast settings
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_broadcast_port")]
    pub port: u16,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: DEFAULT_BROADCAST_PORT,
        }
    }
}

/// Delays driving the watcher, scheduler and relay client
#[derive(Debug, Clone, Deserialize)]
pub struct Timings {
    /// Idle quantum after which coalesced filesystem events are flushed
    #[serde(default = "default_coalesce_ms")]
    pub coalesce_ms: u64,
    /// Quiet period after the last change before a sync runs
    #[serde(default = "default_sync_debounce_ms")]
    pub sync_debounce_ms: u64,
    /// Delay used to batch several commits into one push
    #[serde(default = "default_push_delay_ms")]
    pub push_delay_ms: u64,
    /// Retry interval for the relay connection
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,
    /// Safety-net sync interval; 0 disables it
    #[serde(default = "default_periodic_sync_secs")]
    pub periodic_sync_secs: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            coalesce_ms: default_coalesce_ms(),
            sync_debounce_ms: default_sync_debounce_ms(),
            push_delay_ms: default_push_delay_ms(),
            reconnect_secs: default_reconnect_secs(),
            periodic_sync_secs: default_periodic_sync_secs(),
        }
    }
}

impl Timings {
    pub fn coalesce(&self) -> Duration {
        Duration::from_millis(self.coalesce_ms)
    }

    pub fn sync_debounce(&self) -> Duration {
        Duration::from_millis(self.sync_debounce_ms)
    }

    pub fn push_delay(&self) -> Duration {
        Duration::from_millis(self.push_delay_ms)
    }

    pub fn reconnect(&self) -> Duration {
        Duration::from_secs(self.reconnect_secs)
    }

    pub fn periodic_sync(&self) -> Option<Duration> {
        (self.periodic_sync_secs > 0).then(|| Duration::from_secs(self.periodic_sync_secs))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_dir: default_sync_dir(),
            server_addr: None,
            listen_addr: default_listen_addr(),
            log_dir: default_log_dir(),
            metadata_dir: default_metadata_dir(),
            remote: default_remote(),
            branch: default_branch(),
            info_cmd: default_info_cmd(),
            alert_cmd: default_alert_cmd(),
            broadcast: BroadcastConfig::default(),
            timings: Timings::default(),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicitly given file must exist. Without one, the default location
    /// (`~/.config/treesync/config.toml`) is read if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        Ok(config.expanded())
    }

    /// Parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&raw)
    }

    /// Parse TOML text
    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Expand `~` in path-valued fields
    pub fn expanded(mut self) -> Self {
        self.sync_dir = expand_path(&self.sync_dir);
        self.log_dir = expand_path(&self.log_dir);
        self
    }

    /// Sync directory with trailing separators removed
    pub fn root(&self) -> PathBuf {
        self.sync_dir.components().collect()
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&raw).to_string())
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("treesync").join("config.toml"))
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_sync_dir() -> PathBuf {
    home().join("treesync")
}

fn default_log_dir() -> PathBuf {
    home().join(".treesync")
}

fn default_listen_addr() -> String {
    DEFAULT_RELAY_ADDR.to_string()
}

fn default_metadata_dir() -> String {
    DEFAULT_METADATA_DIR.to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_info_cmd() -> String {
    "treesync-info".to_string()
}

fn default_alert_cmd() -> String {
    "treesync-alert".to_string()
}

fn default_true() -> bool {
    true
}

fn default_broadcast_port() -> u16 {
    DEFAULT_BROADCAST_PORT
}

fn default_coalesce_ms() -> u64 {
    100
}

fn default_sync_debounce_ms() -> u64 {
    2_000
}

fn default_push_delay_ms() -> u64 {
    10_000
}

fn default_reconnect_secs() -> u64 {
    10
}

fn default_periodic_sync_secs() -> u64 {
    600
}
