//! Health Routes
//!
//! - GET /health/live - Liveness probe (process is alive)
//! - GET /health/ready - Readiness probe (hub accepting sessions)
//! - GET /health - Full health status

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::websocket::HubState;

/// GET /health/live
///
/// Returns 200 if the process is alive, no dependency checks.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
///
/// Returns 200 while the hub is admitting sessions.
pub async fn readiness(State(state): State<Arc<AppState>>) -> ApiResult<StatusCode> {
    match state.hub.state() {
        HubState::Running => Ok(StatusCode::OK),
        other => Err(ApiError::ServiceUnavailable(format!(
            "hub is {:?}",
            other
        ))),
    }
}

/// GET /health
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let hub = state.hub.state();
    let status = match hub {
        HubState::Running => "healthy",
        HubState::Draining => "draining",
        HubState::Stopped => "stopped",
    };

    Json(HealthResponse {
        status: status.to_string(),
        hub,
        connections: state.ws_connection_count().await,
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
