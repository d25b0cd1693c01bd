//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::websocket::Keepalive;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub significance: SignificanceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// WebSocket server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,

    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_ms: u64,

    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_max_connections() -> usize {
    1000
}

fn default_ping_interval() -> u64 {
    30
}

fn default_ping_timeout() -> u64 {
    10
}

fn default_startup_timeout() -> u64 {
    5000
}

fn default_shutdown_timeout() -> u64 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            ping_interval_secs: default_ping_interval(),
            ping_timeout_secs: default_ping_timeout(),
            startup_timeout_ms: default_startup_timeout(),
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

impl ServerConfig {
    /// Create config with custom host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Keepalive settings; `ping_interval_secs = 0` turns keepalive off
    pub fn keepalive(&self) -> Option<Keepalive> {
        if self.ping_interval_secs == 0 {
            return None;
        }
        Some(Keepalive {
            interval: Duration::from_secs(self.ping_interval_secs),
            timeout: Duration::from_secs(self.ping_timeout_secs),
        })
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Full/incremental tiering thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct SignificanceConfig {
    #[serde(default = "default_full_refresh")]
    pub full_refresh_secs: u64,

    /// Percent, e.g. `0.5` for half a percent
    #[serde(default = "default_value_change_pct")]
    pub value_change_pct: f64,

    #[serde(default = "default_pnl_change_abs")]
    pub pnl_change_abs: f64,

    #[serde(default = "default_feed_slice")]
    pub feed_slice: usize,
}

fn default_full_refresh() -> u64 {
    60
}

fn default_value_change_pct() -> f64 {
    0.5
}

fn default_pnl_change_abs() -> f64 {
    1000.0
}

fn default_feed_slice() -> usize {
    5
}

impl Default for SignificanceConfig {
    fn default() -> Self {
        Self {
            full_refresh_secs: default_full_refresh(),
            value_change_pct: default_value_change_pct(),
            pnl_change_abs: default_pnl_change_abs(),
            feed_slice: default_feed_slice(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Standard config file locations, in search order
    pub fn search_paths() -> Vec<PathBuf> {
        [
            dirs::config_dir().map(|p| p.join("pulsecast").join("config.toml")),
            Some(PathBuf::from("/etc/pulsecast/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// First existing file among the standard locations
    pub fn default_path() -> Option<PathBuf> {
        first_existing(&Self::search_paths())
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        for path in Self::search_paths().iter().filter(|p| p.exists()) {
            match Self::load_with_env(path) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config;
                }
                Err(e) => {
                    tracing::warn!("Failed to load config from {:?}: {}", path, e);
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Unparseable numeric values are ignored
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("PULSECAST_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PULSECAST_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(max) = lookup("PULSECAST_MAX_CONNECTIONS").and_then(|m| m.parse().ok()) {
            self.server.max_connections = max;
        }

        if let Some(level) = lookup("PULSECAST_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("PULSECAST_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

fn first_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| p.exists()).cloned()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Pulsecast Configuration
#
# Environment variables override these settings:
# - PULSECAST_HOST
# - PULSECAST_PORT
# - PULSECAST_MAX_CONNECTIONS
# - PULSECAST_LOG_LEVEL
# - PULSECAST_LOG_FORMAT

[server]
# Interface to bind the WebSocket listener to
host = "localhost"

# Listening port (0 picks a free port)
port = 8765

# Connections beyond this are refused with an error message
max_connections = 1000

# Keepalive: ping idle peers every interval, drop them after interval + timeout
# (ping_interval_secs = 0 disables keepalive)
ping_interval_secs = 30
ping_timeout_secs = 10

# How long start() waits for the listener to come up (ms)
startup_timeout_ms = 5000

# How long stop() waits for the server thread to exit (ms)
shutdown_timeout_ms = 5000

[significance]
# A full dashboard snapshot is sent at least this often (seconds)
full_refresh_secs = 60

# Send an incremental update when portfolio value moves more than this (percent)
value_change_pct = 0.5

# ...or when P&L moves more than this (absolute)
pnl_change_abs = 1000.0

# Latest news/insight items included in a full snapshot
feed_slice = 5

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
