//! Data loader runtime configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{parse_bool_env, parse_env, ConfigError, ConfigResult};

/// Registry scheduler settings and default loader options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLoaderConfig {
    /// Interval between scheduled dispatch attempts, in milliseconds
    pub schedule_duration_ms: u64,

    /// Keep re-checking dispatch predicates on every tick instead of
    /// only retrying loaders that were skipped
    pub ticker_mode: bool,

    /// Collect keys into batches (disable to load every key on its own)
    pub batching_enabled: bool,

    /// Reuse results for repeated keys within one registry
    pub caching_enabled: bool,

    /// Maximum keys per batch, 0 means unbounded
    pub max_batch_size: usize,
}

impl DataLoaderConfig {
    /// Load data loader configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            schedule_duration_ms: parse_env("DGS_DATALOADER_SCHEDULE_MS", 10)?,
            ticker_mode: parse_bool_env("DGS_DATALOADER_TICKER_MODE", false)?,
            batching_enabled: parse_bool_env("DGS_DATALOADER_BATCHING", true)?,
            caching_enabled: parse_bool_env("DGS_DATALOADER_CACHING", true)?,
            max_batch_size: parse_env("DGS_DATALOADER_MAX_BATCH_SIZE", 0)?,
        })
    }

    /// Scheduler interval as a [`Duration`]
    pub fn schedule_duration(&self) -> Duration {
        Duration::from_millis(self.schedule_duration_ms)
    }

    /// Batch size limit, `None` when unbounded
    pub fn max_batch_size(&self) -> Option<usize> {
        (self.max_batch_size > 0).then_some(self.max_batch_size)
    }

    /// Reject combinations the scheduler cannot run
    pub fn validate(&self) -> ConfigResult<()> {
        if self.ticker_mode && self.schedule_duration_ms == 0 {
            return Err(ConfigError::ValidationError(
                "ticker mode requires DGS_DATALOADER_SCHEDULE_MS greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            schedule_duration_ms: 10,
            ticker_mode: false,
            batching_enabled: true,
            caching_enabled: true,
            max_batch_size: 0,
        }
    }
}
