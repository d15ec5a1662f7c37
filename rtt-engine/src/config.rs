//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::RttError;

/// Timing parameters for sampling, resets and receive backlog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RttConfig {
    /// Interval between send-queue samples, in milliseconds
    pub sample_frequency_ms: u64,
    /// Interval between message resets, in milliseconds
    pub reset_frequency_ms: u64,
    /// Maximum lead time of scheduled receive work, in milliseconds
    pub max_queue_backlog_ms: u64,
}

impl Default for RttConfig {
    fn default() -> Self {
        Self {
            sample_frequency_ms: 700,
            reset_frequency_ms: 10_000,
            max_queue_backlog_ms: 1_000,
        }
    }
}

impl RttConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, RttError> {
        let config: RttConfig =
            serde_json::from_str(json).map_err(|e| RttError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RttError> {
        if self.sample_frequency_ms == 0 {
            return Err(RttError::Config("sample frequency must be positive".into()));
        }
        if self.reset_frequency_ms <= self.sample_frequency_ms {
            return Err(RttError::Config(format!(
                "reset frequency ({} ms) must exceed sample frequency ({} ms)",
                self.reset_frequency_ms, self.sample_frequency_ms
            )));
        }
        Ok(())
    }
}
