//! Service configuration.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::handler::EventLimits;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::Config(err)
    }
}

/// Tunables for [`SyncService`](crate::SyncService). Every field has a default,
/// so a config file only needs the values it changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Periodic reconciliation interval.
    pub sync_interval_secs: u64,
    /// Delay before the first reconciliation after `start()`.
    pub initial_delay_ms: u64,
    /// Fast-path delay for property updates and image uploads.
    pub high_priority_delay_ms: u64,
    /// How many admin properties one reconciliation looks at.
    pub property_fetch_limit: usize,
    /// Attempts per event before it is dead-lettered.
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub max_future_skew_secs: i64,
    pub stale_event_age_secs: i64,
    /// Processed event ids remembered for idempotence.
    pub processed_history: usize,
    pub notification_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 30,
            initial_delay_ms: 2000,
            high_priority_delay_ms: 1000,
            property_fetch_limit: 100,
            max_attempts: 5,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 64_000,
            max_future_skew_secs: 300,
            stale_event_age_secs: 3600,
            processed_history: 1024,
            notification_capacity: 256,
        }
    }
}

impl SyncConfig {
    /// Load a JSON config file and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.sync_interval_secs == 0 {
            return invalid("sync_interval_secs must be greater than zero");
        }
        if self.max_attempts == 0 {
            return invalid("max_attempts must be greater than zero");
        }
        if self.property_fetch_limit == 0 {
            return invalid("property_fetch_limit must be greater than zero");
        }
        if self.notification_capacity == 0 {
            return invalid("notification_capacity must be greater than zero");
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return invalid("retry_max_delay_ms must be at least retry_base_delay_ms");
        }
        if self.max_future_skew_secs < 0 || self.stale_event_age_secs < 0 {
            return invalid("timestamp bounds must not be negative");
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn high_priority_delay(&self) -> Duration {
        Duration::from_millis(self.high_priority_delay_ms)
    }

    /// Backoff before attempt `attempts + 1`: `base * 2^(attempts-1)`, capped.
    pub fn retry_delay_ms(&self, attempts: u32) -> u64 {
        let exponent = attempts.saturating_sub(1).min(32);
        self.retry_base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.retry_max_delay_ms)
    }

    pub fn event_limits(&self) -> EventLimits {
        EventLimits {
            max_future_skew_secs: self.max_future_skew_secs,
            stale_event_age_secs: self.stale_event_age_secs,
        }
    }
}
