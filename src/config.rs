//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::api::ApiConfig;
use crate::producer::ProducerConfig;
use crate::websocket::{HubConfig, SessionConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ApiConfig,

    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub producer: ProducerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, for development
    #[default]
    Pretty,
    /// One JSON object per line, for production
    Json,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
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

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Result<Self, ConfigError> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("sensorcast").join("config.toml")),
            Some(PathBuf::from("/etc/sensorcast/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply `SENSORCAST_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server overrides
        if let Some(host) = lookup("SENSORCAST_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("SENSORCAST_PORT") {
            self.server.port = parse_var("SENSORCAST_PORT", &port)?;
        }
        if let Some(dir) = lookup("SENSORCAST_ASSETS_DIR") {
            self.server.assets_dir = PathBuf::from(dir);
        }

        // Hub overrides
        if let Some(policy) = lookup("SENSORCAST_OVERFLOW_POLICY") {
            self.hub.overflow_policy = parse_var("SENSORCAST_OVERFLOW_POLICY", &policy)?;
        }
        if let Some(capacity) = lookup("SENSORCAST_OUTBOUND_CAPACITY") {
            self.hub.outbound_capacity = parse_var("SENSORCAST_OUTBOUND_CAPACITY", &capacity)?;
        }

        // Producer overrides
        if let Some(tick) = lookup("SENSORCAST_TICK_MS") {
            self.producer.tick_ms = parse_var("SENSORCAST_TICK_MS", &tick)?;
        }

        // Logging overrides
        if let Some(level) = lookup("SENSORCAST_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("SENSORCAST_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                _ => return Err(ConfigError::invalid("SENSORCAST_LOG_FORMAT", &format)),
            };
        }

        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate().map_err(ConfigError::Invalid)?;
        if self.hub.outbound_capacity == 0 {
            return Err(ConfigError::Invalid(
                "hub.outbound_capacity must be at least 1".to_string(),
            ));
        }
        if self.producer.tick_ms == 0 {
            return Err(ConfigError::Invalid(
                "producer.tick_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::invalid(key, value))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    fn invalid(key: &str, value: &str) -> Self {
        ConfigError::Invalid(format!("{}={:?}", key, value))
    }
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Sensorcast Configuration
#
# Environment variables override these settings:
# - SENSORCAST_HOST
# - SENSORCAST_PORT
# - SENSORCAST_ASSETS_DIR
# - SENSORCAST_OVERFLOW_POLICY
# - SENSORCAST_OUTBOUND_CAPACITY
# - SENSORCAST_TICK_MS
# - SENSORCAST_LOG_LEVEL
# - SENSORCAST_LOG_FORMAT

[server]
# HTTP service host
host = "0.0.0.0"

# HTTP service port
port = 3000

# Directory served at /
assets_dir = "www"

[hub]
# Pending hub commands before senders wait
command_capacity = 256

# Payloads buffered per viewer
outbound_capacity = 16

# Full viewer queue: drop_oldest, drop_newest or disconnect
overflow_policy = "drop_oldest"

[session]
# Time allowed to write one frame (ms)
write_timeout_ms = 10000

# Time allowed between pongs (ms)
pong_timeout_ms = 60000

# Ping period (ms), defaults to 9/10 of pong_timeout_ms
# ping_interval_ms = 54000

# Largest inbound message accepted (bytes)
max_message_size = 1024

[producer]
# Time between readings (ms)
tick_ms = 16

# Synthetic wave shape
wave_period = 60
wave_amplitude = 1.0

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
