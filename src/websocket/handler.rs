//! WebSocket Handler
//!
//! Upgrades `GET /ws` requests and hands the socket to a [`Session`].

use axum::{
    extract::{ws::WebSocket, State, WebSocketUpgrade},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use super::hub::ConnectionHub;
use super::session::{Session, SessionConfig};
use crate::api::AppState;

/// WebSocket upgrade handler
///
/// Upgrade failures are logged and only affect the requesting client.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let hub = state.hub.clone();
    let config = state.session.clone();

    ws.max_message_size(config.max_message_size)
        .on_failed_upgrade(|e| {
            tracing::warn!(error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| handle_socket(socket, hub, config))
}

/// Drive an upgraded socket until its session ends
async fn handle_socket(socket: WebSocket, hub: ConnectionHub, config: SessionConfig) {
    let (mut sender, receiver) = socket.split();

    let session = match Session::register(&hub, config).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting WebSocket connection");
            let _ = sender.close().await;
            return;
        }
    };

    tracing::debug!(session_id = %session.id(), "WebSocket connected");
    session.run(sender, receiver).await;
}
