//! Producer Loop
//!
//! Samples the data source on a fixed cadence and broadcasts each reading
//! through the hub. On shutdown it stops the ticker, closes the source, and
//! only then closes the hub, so nothing is broadcast from a released source.

use serde::Deserialize;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::sensor::DataSource;
use crate::websocket::ConnectionHub;

/// Producer loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    /// Time between samples
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Samples per period of the synthetic wave
    #[serde(default = "default_wave_period")]
    pub wave_period: u32,
    /// Peak value of the synthetic wave
    #[serde(default = "default_wave_amplitude")]
    pub wave_amplitude: f64,
}

fn default_tick_ms() -> u64 {
    16
}

fn default_wave_period() -> u32 {
    60
}

fn default_wave_amplitude() -> f64 {
    1.0
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            wave_period: default_wave_period(),
            wave_amplitude: default_wave_amplitude(),
        }
    }
}

impl ProducerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

/// Counters reported when the loop exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub ticks: u64,
    pub broadcasts: u64,
    pub skipped: u64,
}

/// Periodic sampler feeding the hub
pub struct Producer<S> {
    source: S,
    hub: ConnectionHub,
    tick: Duration,
}

impl<S: DataSource> Producer<S> {
    /// Wrap an already opened data source
    pub fn new(source: S, hub: ConnectionHub, tick: Duration) -> Self {
        Self { source, hub, tick }
    }

    /// Run until `shutdown` fires, then release the source and close the hub
    pub async fn run(mut self, shutdown: CancellationToken) -> ProducerStats {
        let mut stats = ProducerStats::default();
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            source = self.source.name(),
            tick_ms = self.tick.as_millis() as u64,
            "Producer started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    stats.ticks += 1;
                    match self.sample().await {
                        Some(payload) => {
                            if self.hub.broadcast(payload).await.is_err() {
                                tracing::warn!("Hub closed underneath the producer");
                                break;
                            }
                            stats.broadcasts += 1;
                        }
                        None => stats.skipped += 1,
                    }
                }
            }
        }

        drop(ticker);

        if let Err(e) = self.source.close().await {
            tracing::error!(source = self.source.name(), error = %e, "Failed to close data source");
        }

        tracing::info!("Closing WebSocket sessions...");
        self.hub.close().await;

        tracing::info!(
            ticks = stats.ticks,
            broadcasts = stats.broadcasts,
            skipped = stats.skipped,
            "Producer stopped"
        );
        stats
    }

    /// One reading as a wire payload, or `None` to skip this tick
    async fn sample(&mut self) -> Option<bytes::Bytes> {
        let reading = match self.source.read().await {
            Ok(reading) => reading,
            Err(e) => {
                tracing::warn!(source = self.source.name(), error = %e, "Skipping tick, read failed");
                return None;
            }
        };

        match reading.to_payload() {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping tick, serialization failed");
                None
            }
        }
    }
}
