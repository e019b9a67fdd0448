//! Engine configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the transport and processing core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub sample_rate: f64,
    /// Frames per process cycle.
    pub block_size: usize,
    /// Length of the start/stop/locate fade.
    pub declick_samples: usize,
    /// Worker threads running route processing.
    pub worker_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            block_size: 1024,
            declick_samples: 256,
            worker_threads: 1,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate < 8000.0 || self.sample_rate > 384000.0 {
            return Err(Error::InvalidConfig(format!(
                "sample_rate {} out of range (8000-384000 Hz)",
                self.sample_rate
            )));
        }
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "block_size {} must be a non-zero power of two",
                self.block_size
            )));
        }
        if self.declick_samples > self.block_size {
            return Err(Error::InvalidConfig(format!(
                "declick_samples {} exceeds block_size {}",
                self.declick_samples, self.block_size
            )));
        }
        Ok(())
    }
}
