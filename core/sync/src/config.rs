//! Sync configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use bundlesync_common::{Error, Result};

/// When the scheduler triggers syncs on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SyncMode {
    /// Sync only when requested.
    Manual,
    /// Sync at regular intervals, in addition to explicit requests.
    Periodic { interval_secs: u64 },
}

impl SyncMode {
    /// Interval between automatic syncs, if any.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            SyncMode::Manual => None,
            SyncMode::Periodic { interval_secs } => Some(Duration::from_secs(*interval_secs)),
        }
    }
}

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum number of resource requests in flight.
    pub max_concurrent_fetches: usize,
    /// Deadline for each individual request, in milliseconds.
    pub fetch_timeout_ms: Option<u64>,
    /// Whole-sync retries after a transient failure (0 disables).
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub retry_initial_delay_ms: u64,
    /// Scheduler mode.
    pub sync_mode: SyncMode,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 4,
            fetch_timeout_ms: None,
            max_retries: 0,
            retry_initial_delay_ms: 1000,
            sync_mode: SyncMode::Manual,
        }
    }
}

impl SyncConfig {
    /// Per-request deadline.
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }

    /// Delay before the first retry.
    pub fn retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.retry_initial_delay_ms)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_fetches == 0 {
            return Err(Error::InvalidInput(
                "max_concurrent_fetches must be at least 1".to_string(),
            ));
        }
        if self.fetch_timeout_ms == Some(0) {
            return Err(Error::InvalidInput(
                "fetch_timeout_ms must be positive".to_string(),
            ));
        }
        if let SyncMode::Periodic { interval_secs: 0 } = self.sync_mode {
            return Err(Error::InvalidInput(
                "Periodic sync interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
