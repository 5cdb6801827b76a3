//! Process Lifecycle
//!
//! Startup runs in dependency order: open the data source, start the hub,
//! bind the listener, start the producer. Shutdown unwinds in reverse: the
//! producer releases the source and closes the hub, then the HTTP server
//! drains.

use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::api::{build_router, AppState};
use crate::config::{Config, ConfigError};
use crate::producer::{Producer, ProducerStats};
use crate::sensor::{DataSource, SourceError, SyntheticSource};
use crate::websocket::ConnectionHub;

/// Fatal, process-level errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to open data source: {0}")]
    Source(#[from] SourceError),

    #[error("Could not bind server to address '{addr}': {error}")]
    Bind {
        addr: String,
        #[source]
        error: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A started server: source open, hub running, listener bound
pub struct Server<S> {
    config: Config,
    source: S,
    hub: ConnectionHub,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl<S: DataSource + 'static> Server<S> {
    pub async fn start(config: Config, mut source: S) -> Result<Self, ServerError> {
        config.validate()?;

        source.open().await?;
        tracing::info!(source = source.name(), "Data source opened");

        let hub = ConnectionHub::spawn(config.hub.clone());

        let addr = config.server.addr();
        let bound = TcpListener::bind(&addr)
            .await
            .and_then(|listener| Ok((listener.local_addr()?, listener)));
        let (local_addr, listener) = match bound {
            Ok(bound) => bound,
            Err(error) => {
                if let Err(e) = source.close().await {
                    tracing::warn!(error = %e, "Failed to close data source");
                }
                hub.close().await;
                return Err(ServerError::Bind { addr, error });
            }
        };

        Ok(Self {
            config,
            source,
            hub,
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn hub(&self) -> &ConnectionHub {
        &self.hub
    }

    /// Serve until `shutdown` fires, then unwind
    pub async fn run(self, shutdown: CancellationToken) -> Result<ProducerStats, ServerError> {
        let Server {
            config,
            source,
            hub,
            listener,
            local_addr,
        } = self;

        tracing::info!("Opening server on {}", local_addr);

        let state = AppState::new(hub.clone(), config.session.clone(), config.server.clone());
        let router = build_router(state);

        let server_stop = CancellationToken::new();
        let mut server = tokio::spawn({
            let stop = server_stop.clone();
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move { stop.cancelled().await })
                    .await
            }
        });

        let mut producer = tokio::spawn(
            Producer::new(source, hub, config.producer.tick()).run(shutdown.clone()),
        );

        let stats = tokio::select! {
            stats = &mut producer => stats?,
            result = &mut server => {
                // The server died on its own; stop producing and report it
                shutdown.cancel();
                producer.await?;
                result??;
                return Err(ServerError::Serve(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "server exited unexpectedly",
                )));
            }
        };

        server_stop.cancel();
        server.await??;

        tracing::info!("Server stopped");
        Ok(stats)
    }
}

/// Run with the built-in synthetic source
pub async fn run(config: Config, shutdown: CancellationToken) -> Result<(), ServerError> {
    let source = SyntheticSource::new(config.producer.wave_period, config.producer.wave_amplitude);
    let server = Server::start(config, source).await?;
    server.run(shutdown).await?;
    Ok(())
}
