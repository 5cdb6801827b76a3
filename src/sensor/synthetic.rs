//! Synthetic data source
//!
//! Produces a smooth three-axis wave so the stream can be watched without
//! any hardware attached.

use async_trait::async_trait;
use std::f64::consts::PI;

use super::{DataSource, Reading, SourceError};

/// Deterministic wave generator
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    /// Samples per full wave period
    period: u32,
    amplitude: f64,
    step: u64,
    open: bool,
}

impl SyntheticSource {
    pub fn new(period: u32, amplitude: f64) -> Self {
        Self {
            period: period.max(1),
            amplitude,
            step: 0,
            open: false,
        }
    }

    fn sample(&self) -> (f64, f64, f64) {
        let phase = 2.0 * PI * (self.step % self.period as u64) as f64 / self.period as f64;
        (
            self.amplitude * phase.sin(),
            self.amplitude * phase.cos(),
            self.amplitude * (phase * 2.0).sin() / 2.0,
        )
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        // ~1 second per period at the default 16 ms tick
        Self::new(60, 1.0)
    }
}

#[async_trait]
impl DataSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        self.open = true;
        self.step = 0;
        Ok(())
    }

    async fn read(&mut self) -> Result<Reading, SourceError> {
        if !self.open {
            return Err(SourceError::NotOpen);
        }
        let (x, y, z) = self.sample();
        self.step = self.step.wrapping_add(1);
        Ok(Reading::now(x, y, z))
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.open = false;
        Ok(())
    }
}
