//! TOML-based configuration for the server.
//!
//! The settings file defaults to `config/settings.toml` relative to the
//! working directory and looks like this:
//!
//! ```toml
//! [server]
//! server_port = 8080
//! server_name = "DefaultServer"
//! log_level = "info"
//! bind_address = "0.0.0.0"
//! password = "admin123"
//!
//! [workers]
//! worker_pool_size = 10
//! queue_capacity = 256
//!
//! [discovery]
//! discovery_port = 8888
//! broadcast_address = "255.255.255.255"
//! beacon_interval_ms = 3000
//!
//! [logging]
//! log_file = "logs/server.log"
//! ```
//!
//! # Missing-file policy
//!
//! A missing file is not an error.  [`load_or_create`] writes the documented
//! defaults to disk (creating parent directories) and returns them, so the
//! first run leaves behind a file the operator can edit.  A file that exists
//! but fails to parse or validate is fatal: the server refuses to start
//! rather than silently running with settings the operator did not write.
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "...")]`, and every section is
//! itself optional, so a partial file only overrides what it mentions.
//! Unknown keys are rejected.
//!
//! # Flat keys
//!
//! Older settings files are a flat list of `server_port`, `server_name` and
//! `log_level` pairs.  Those three keys are accepted at the top level and
//! folded into `[server]`, taking precedence over the sectioned values.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default location of the settings file.
pub const DEFAULT_CONFIG_PATH: &str = "config/settings.toml";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
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

    /// The config parsed but holds an unusable value.
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,

    // Flat keys; emptied by `fold_flat_keys` and never written back.
    #[serde(default, skip_serializing)]
    server_port: Option<u16>,
    #[serde(default, skip_serializing)]
    server_name: Option<String>,
    #[serde(default, skip_serializing)]
    log_level: Option<String>,
}

/// TCP service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// TCP port clients connect to.
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    /// Human-readable name of this server instance.
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// `tracing` log level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Address the listener binds to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Shared secret clients must send before anything is echoed.
    #[serde(default = "default_password")]
    pub password: String,
    /// First line sent to every new connection.
    #[serde(default = "default_greeting")]
    pub greeting: String,
    /// Line sent right after `PASSED`.
    #[serde(default = "default_welcome")]
    pub welcome: String,
}

/// Worker pool and event loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Number of threads handling connection I/O.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Maximum number of connection tasks waiting for a free worker.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long shutdown waits for in-flight tasks before giving up.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// Upper bound on a single readiness poll.  Absent means block until an event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    /// How long a worker keeps retrying a write on a full socket buffer.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

/// UDP presence beacon settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Master switch for both beacon tasks.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether to run the listener in addition to the broadcaster.
    #[serde(default = "default_true")]
    pub listen: bool,
    /// UDP port beacons are sent to and received on.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Destination address for outgoing beacons.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
    /// Interval between two beacons.
    #[serde(default = "default_beacon_interval_ms")]
    pub beacon_interval_ms: u64,
    /// Address advertised in beacons.  Absent means auto-detect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_address: Option<String>,
}

/// Persistent event log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// File the event log appends to.
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_server_port() -> u16 {
    8080
}
fn default_server_name() -> String {
    "DefaultServer".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_password() -> String {
    "admin123".to_string()
}
fn default_greeting() -> String {
    overseer_core::protocol::frames::DEFAULT_GREETING.to_string()
}
fn default_welcome() -> String {
    overseer_core::protocol::frames::DEFAULT_WELCOME.to_string()
}
fn default_worker_pool_size() -> usize {
    10
}
fn default_queue_capacity() -> usize {
    256
}
fn default_drain_timeout_ms() -> u64 {
    5_000
}
fn default_write_timeout_ms() -> u64 {
    5_000
}
fn default_true() -> bool {
    true
}
fn default_discovery_port() -> u16 {
    8888
}
fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}
fn default_beacon_interval_ms() -> u64 {
    3_000
}
fn default_log_file() -> PathBuf {
    PathBuf::from("logs/server.log")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_port: default_server_port(),
            server_name: default_server_name(),
            log_level: default_log_level(),
            bind_address: default_bind_address(),
            password: default_password(),
            greeting: default_greeting(),
            welcome: default_welcome(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            queue_capacity: default_queue_capacity(),
            drain_timeout_ms: default_drain_timeout_ms(),
            poll_interval_ms: None,
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            listen: default_true(),
            discovery_port: default_discovery_port(),
            broadcast_address: default_broadcast_address(),
            beacon_interval_ms: default_beacon_interval_ms(),
            origin_address: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_file: default_log_file(),
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl AppConfig {
    /// Checks values serde cannot check on its own.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.worker_pool_size == 0 {
            return Err(invalid("workers.worker_pool_size", "must be at least 1"));
        }
        if self.workers.queue_capacity == 0 {
            return Err(invalid("workers.queue_capacity", "must be at least 1"));
        }
        if self.discovery.beacon_interval_ms == 0 {
            return Err(invalid("discovery.beacon_interval_ms", "must be greater than 0"));
        }
        self.listen_addr()?;
        self.broadcast_target()?;
        Ok(())
    }

    /// Socket address the TCP listener binds to.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `bind_address` is not an IP address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .server
            .bind_address
            .parse()
            .map_err(|e| invalid("server.bind_address", format!("{e}")))?;
        Ok(SocketAddr::new(ip, self.server.server_port))
    }

    /// Socket address the beacon listener binds to (all interfaces).
    pub fn discovery_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.discovery.discovery_port)
    }

    /// Destination of outgoing beacons.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `broadcast_address` is not IPv4.
    pub fn broadcast_target(&self) -> Result<SocketAddr, ConfigError> {
        let ip: Ipv4Addr = self
            .discovery
            .broadcast_address
            .parse()
            .map_err(|e| invalid("discovery.broadcast_address", format!("{e}")))?;
        Ok(SocketAddr::new(IpAddr::V4(ip), self.discovery.discovery_port))
    }

    pub fn beacon_interval(&self) -> Duration {
        Duration::from_millis(self.discovery.beacon_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.workers.drain_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.workers.write_timeout_ms)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.workers.poll_interval_ms.map(Duration::from_millis)
    }

    /// Moves any flat top-level keys into `[server]`.
    fn fold_flat_keys(&mut self) {
        if let Some(port) = self.server_port.take() {
            self.server.server_port = port;
        }
        if let Some(name) = self.server_name.take() {
            self.server.server_name = name;
        }
        if let Some(level) = self.log_level.take() {
            self.server.log_level = level;
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads and validates the config at `path`, returning `None` if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed or names an unknown key, and
/// [`ConfigError::Invalid`] if a value is unusable.
pub fn load_config(path: &Path) -> Result<Option<AppConfig>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let mut cfg: AppConfig = toml::from_str(&content)?;
            cfg.fold_flat_keys();
            cfg.validate()?;
            Ok(Some(cfg))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Loads the config at `path`, materialising the defaults on disk first if
/// the file is absent.
///
/// # Errors
///
/// Same as [`load_config`], plus [`ConfigError::Io`] if the default file
/// cannot be written.
pub fn load_or_create(path: &Path) -> Result<AppConfig, ConfigError> {
    if let Some(cfg) = load_config(path)? {
        return Ok(cfg);
    }
    let cfg = AppConfig::default();
    save_config(&cfg, path)?;
    tracing::info!("default configuration written to {}", path.display());
    Ok(cfg)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
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

// ── Tests ─────────────────────────────────────────────────────────────────────
