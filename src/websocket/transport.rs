//! Transport seam
//!
//! Session loops speak in [`Frame`]s through [`FrameSink`] and
//! [`FrameStream`], so the keepalive and coalescing logic does not depend on
//! axum. The axum WebSocket halves implement both traits here.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;

/// Transport-neutral WebSocket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Application payload, sent as a text message
    Text(Bytes),
    Ping,
    Pong,
    Close,
    /// Any other inbound frame (client text, binary, ...)
    Other,
}

/// Transport-level failures. Always scoped to one session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Write timed out after {0:?}")]
    WriteTimeout(std::time::Duration),

    #[error("No pong received within {0:?}")]
    PongTimeout(std::time::Duration),

    #[error("Transport error: {0}")]
    Io(String),
}

/// Outbound half of a connection
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;
}

/// Inbound half of a connection
#[async_trait]
pub trait FrameStream: Send {
    /// Next inbound frame, `None` once the peer is gone
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;
}

#[async_trait]
impl FrameSink for SplitSink<WebSocket, Message> {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Text(bytes) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => Message::Text(text),
                Err(e) => Message::Binary(e.into_bytes()),
            },
            Frame::Ping => Message::Ping(Vec::new()),
            Frame::Close => Message::Close(None),
            // Inbound only; axum answers client pings itself
            Frame::Pong | Frame::Other => return Ok(()),
        };

        SinkExt::send(self, message)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

#[async_trait]
impl FrameStream for SplitStream<WebSocket> {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        let message = match self.next().await? {
            Ok(message) => message,
            Err(e) => return Some(Err(TransportError::Io(e.to_string()))),
        };

        Some(Ok(match message {
            Message::Pong(_) => Frame::Pong,
            Message::Ping(_) => Frame::Ping,
            Message::Close(_) => Frame::Close,
            Message::Text(_) | Message::Binary(_) => Frame::Other,
        }))
    }
}
