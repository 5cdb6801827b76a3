//! Response bodies

use serde::Serialize;

use crate::websocket::HubState;

/// Full health status
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status: healthy, draining, stopped
    pub status: String,
    /// Coordination loop state
    pub hub: HubState,
    /// Live WebSocket sessions
    pub connections: usize,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Application version
    pub version: String,
}
