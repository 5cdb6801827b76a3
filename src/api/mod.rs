//! HTTP Surface
//!
//! Axum router for the viewer page, the WebSocket stream, and health probes.
//!
//! # Endpoints
//!
//! - `GET /ws` - Live reading stream (WebSocket)
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//! - `GET /*` - Static viewer assets

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::websocket::websocket_handler;

/// Build the router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let assets = ServeDir::new(&state.config.assets_dir);

    // Create shared state
    let shared_state = Arc::new(state);

    Router::new()
        .route("/ws", get(websocket_handler))
        .nest("/health", health_routes)
        .fallback_service(assets)
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state)
}

/// Wait for SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
