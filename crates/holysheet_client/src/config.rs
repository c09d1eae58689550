//! Client config load/save for `~/.holysheet/config.yaml`.
//! Sections: server.*, reconnect.*, dataset.*. Every field has a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::connection::RetryPolicy;

pub const DEFAULT_ORIGIN: &str = "http://127.0.0.1:8000";
pub const DEFAULT_WS_PATH: &str = "/ws";
pub const DEFAULT_RANGE: &str = "A1:Z1000";

/// Server section (origin the client was served from, socket path).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default = "default_path")]
    pub path: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            path: default_path(),
        }
    }
}

/// Reconnect section (initial delay, backoff curve, optional attempt cap).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReconnectSection {
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: None,
        }
    }
}

impl ReconnectSection {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(self.delay_ms),
            backoff_factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: self.max_attempts,
        }
    }
}

/// Dataset section (remote load timeout, default cell range).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DatasetSection {
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
    #[serde(default = "default_range")]
    pub range: String,
}

impl Default for DatasetSection {
    fn default() -> Self {
        Self {
            load_timeout_ms: default_load_timeout_ms(),
            range: default_range(),
        }
    }
}

impl DatasetSection {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

/// Full config.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub dataset: DatasetSection,
}

impl Config {
    /// WebSocket endpoint for the configured origin.
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        endpoint_for_origin(&self.server.origin, &self.server.path)
    }
}

fn default_origin() -> String {
    DEFAULT_ORIGIN.into()
}

fn default_path() -> String {
    DEFAULT_WS_PATH.into()
}

fn default_delay_ms() -> u64 {
    3000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_load_timeout_ms() -> u64 {
    15_000
}

fn default_range() -> String {
    DEFAULT_RANGE.into()
}

/// Derive the socket endpoint from a page origin: same host and port,
/// `wss` when the origin is secure, `ws` otherwise.
pub fn endpoint_for_origin(origin: &str, path: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(origin).map_err(|e| ConfigError::Origin(format!("{}: {}", origin, e)))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(ConfigError::Origin(format!(
                "unsupported scheme '{}' in {}",
                other, origin
            )))
        }
    };
    if url.host_str().is_none() {
        return Err(ConfigError::Origin(format!("no host in {}", origin)));
    }
    url.set_scheme(scheme)
        .map_err(|_| ConfigError::Origin(format!("cannot switch {} to {}", origin, scheme)))?;
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Returns the default config file path: `~/.holysheet/config.yaml` (platform-specific).
pub fn default_config_path() -> Option<PathBuf> {
    let home = home_dir()?;
    Some(home.join(".holysheet").join("config.yaml"))
}

#[cfg(unix)]
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(windows)]
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE").map(PathBuf::from)
}

#[cfg(not(any(unix, windows)))]
fn home_dir() -> Option<PathBuf> {
    None
}

/// Load config from a YAML file.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Save config to a YAML file. Creates parent directory if missing.
pub fn save(path: &Path, config: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }
    }
    let contents = serde_yaml::to_string(config).map_err(|e| ConfigError::Parse(e.to_string()))?;
    std::fs::write(path, contents).map_err(|e| ConfigError::Io(e.to_string()))
}

/// Config load/save error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("invalid config: {0}")]
    Parse(String),
    #[error("invalid origin: {0}")]
    Origin(String),
}
