//! Sensor Data Sources
//!
//! A [`DataSource`] yields one [`Reading`] per producer tick. The producer
//! only depends on this trait, so hardware drivers and generators are
//! interchangeable.

mod synthetic;

pub use synthetic::SyntheticSource;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One sampled value from a data source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Sample time in Unix milliseconds
    pub timestamp: i64,
}

impl Reading {
    /// Create a reading stamped with the current time
    pub fn now(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Serialize to the compact JSON wire payload
    pub fn to_payload(&self) -> Result<Bytes, SourceError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// Common trait for all data sources
#[async_trait]
pub trait DataSource: Send {
    /// Human-readable name, used in logs
    fn name(&self) -> &str;

    /// Acquire the device. Failure is fatal at startup.
    async fn open(&mut self) -> Result<(), SourceError>;

    /// Take one sample. Failure skips a single tick.
    async fn read(&mut self) -> Result<Reading, SourceError>;

    /// Release the device. Called exactly once on shutdown.
    async fn close(&mut self) -> Result<(), SourceError>;
}

/// Errors that can occur while sampling
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Data source not open")]
    NotOpen,

    #[error("Device error: {0}")]
    Device(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
