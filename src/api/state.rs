//! Application State
//!
//! Shared state accessible by all HTTP handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Instant;

use crate::websocket::{ConnectionHub, SessionConfig};

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// WebSocket connection hub
    pub hub: ConnectionHub,
    /// Keepalive and write timing handed to every new session
    pub session: SessionConfig,
    /// HTTP server configuration
    pub config: ApiConfig,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(hub: ConnectionHub, session: SessionConfig, config: ApiConfig) -> Self {
        Self {
            hub,
            session,
            config,
            start_time: Instant::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Get WebSocket connection count
    pub async fn ws_connection_count(&self) -> usize {
        self.hub.connection_count().await
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory of static viewer assets served at `/`
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_assets_dir() -> PathBuf {
    PathBuf::from("www")
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            assets_dir: default_assets_dir(),
        }
    }
}

impl ApiConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Apply a `host:port` or `:port` override
    pub fn set_addr(&mut self, addr: &str) -> Result<(), String> {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| format!("address '{}' is missing a port", addr))?;
        self.port = port
            .parse()
            .map_err(|_| format!("invalid port in address '{}'", addr))?;
        if !host.is_empty() {
            self.host = host.to_string();
        }
        Ok(())
    }
}
