//! TOML-based configuration for the netward client.
//!
//! Reads and writes [`ClientConfig`] in the platform config directory:
//! - Windows:  `%APPDATA%\Netward\config.toml`
//! - Linux:    `~/.config/netward/config.toml` (or `$XDG_CONFIG_HOME/netward`)
//! - macOS:    `~/Library/Application Support/Netward/config.toml`
//!
//! Example:
//!
//! ```toml
//! [client]
//! name = "office-laptop"
//! log_level = "debug"
//!
//! [session]
//! reconnect_delay_secs = 30
//! disconnect_alert_secs = 300
//! ```
//!
//! # Serde default values
//!
//! Every field has a `#[serde(default = "...")]`, so a missing file, a missing
//! section or a missing key all fall back to the documented timings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::session::SessionConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub client: GeneralConfig,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// Common name put in the certificate request when pairing.
    #[serde(default = "default_client_name")]
    pub name: String,
    /// `tracing` log level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSettings {
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    /// Seconds of unreachability before the client raises its own alert.
    #[serde(default = "default_disconnect_alert_secs")]
    pub disconnect_alert_secs: u64,
    #[serde(default = "default_learning_poll_secs")]
    pub learning_poll_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_flush_delay_ms")]
    pub flush_delay_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_stream_auth_timeout_secs")]
    pub stream_auth_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportSettings {
    /// Per-request timeout for REST calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// `ws` or `wss` for the live stream.  `wss` uses mutual TLS and needs
    /// the sensor CA pinned at pairing.
    #[serde(default = "default_stream_scheme")]
    pub stream_scheme: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySettings {
    #[serde(default = "default_service_type")]
    pub service_type: String,
    /// How long `discover` browses before reporting.
    #[serde(default = "default_discovery_timeout_secs")]
    pub timeout_secs: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_client_name() -> String {
    "netward-client".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_reconnect_delay_secs() -> u64 {
    30
}
fn default_disconnect_alert_secs() -> u64 {
    300
}
fn default_learning_poll_secs() -> u64 {
    30
}
fn default_page_size() -> u32 {
    100
}
fn default_flush_delay_ms() -> u64 {
    200
}
fn default_queue_capacity() -> usize {
    100
}
fn default_stream_auth_timeout_secs() -> u64 {
    10
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_stream_scheme() -> String {
    "ws".to_string()
}
fn default_service_type() -> String {
    "_netward._tcp.local.".to_string()
}
fn default_discovery_timeout_secs() -> u64 {
    5
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: default_reconnect_delay_secs(),
            disconnect_alert_secs: default_disconnect_alert_secs(),
            learning_poll_secs: default_learning_poll_secs(),
            page_size: default_page_size(),
            flush_delay_ms: default_flush_delay_ms(),
            queue_capacity: default_queue_capacity(),
            stream_auth_timeout_secs: default_stream_auth_timeout_secs(),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            stream_scheme: default_stream_scheme(),
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
            timeout_secs: default_discovery_timeout_secs(),
        }
    }
}

impl SessionSettings {
    /// Converts the on-disk numbers into the session's typed configuration.
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            disconnect_alert_after: Duration::from_secs(self.disconnect_alert_secs),
            learning_poll_interval: Duration::from_secs(self.learning_poll_secs),
            page_size: self.page_size,
            flush_delay: Duration::from_millis(self.flush_delay_ms),
            queue_capacity: self.queue_capacity,
            stream_auth_timeout: Duration::from_secs(self.stream_auth_timeout_secs),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the client's files.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the config from the platform path.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `ClientConfig` from `path`, returning the defaults if the file does
/// not exist yet.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<ClientConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ClientConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to `path`, creating the directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &ClientConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Resolves the platform config base directory including the `netward`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Netward"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("netward"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Netward")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
