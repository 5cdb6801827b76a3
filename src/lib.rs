//! # Sensorcast
//!
//! Streams periodically sampled sensor readings to any number of live
//! WebSocket viewers, keeping slow or dead viewers from holding up the rest.
//!
//! ## Modules
//!
//! - [`websocket`]: Connection hub, sessions, and the upgrade handler
//! - [`producer`]: Periodic sampler feeding the hub
//! - [`sensor`]: Data source trait and the synthetic source
//! - [`api`]: HTTP router (viewer assets, `/ws`, health probes)
//! - [`server`]: Startup and shutdown ordering
//! - [`config`]: TOML and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sensorcast::config::Config;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let shutdown = CancellationToken::new();
//!
//!     let trigger = shutdown.clone();
//!     tokio::spawn(async move {
//!         sensorcast::api::shutdown_signal().await;
//!         trigger.cancel();
//!     });
//!
//!     sensorcast::server::run(Config::default(), shutdown).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod producer;
pub mod sensor;
pub mod server;
pub mod websocket;

// Re-export top-level types for convenience
pub use config::Config;
pub use producer::{Producer, ProducerConfig};
pub use sensor::{DataSource, Reading, SourceError, SyntheticSource};
pub use server::{Server, ServerError};
pub use websocket::{ConnectionHub, HubConfig, HubError, OverflowPolicy, Session, SessionConfig};
