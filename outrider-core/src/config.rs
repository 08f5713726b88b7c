//! # Configuration Management
//!
//! Serde-backed configuration for the dispatch engine with defaults,
//! validation, TOML file loading, and environment-variable overrides.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Default per-worker queue capacity.
pub const DEFAULT_WORKER_QUEUE_SIZE: usize = 64;

/// Default retransmission interval in milliseconds.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 5_000;

/// Default number of retransmissions before a packet is discarded.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default timer tick granularity in milliseconds.
pub const DEFAULT_TICK_GRANULARITY_MS: u64 = 250;

/// Default number of consecutive HIGH/MEDIUM dispatches before a LOW
/// record is promoted.
pub const DEFAULT_PROMOTE_AFTER: u32 = 8;

/// Default maximum payload bytes per packet.
pub const DEFAULT_MAX_PACKET_BYTES: usize = 64 * 1024;

/// Default scheduler idle wait in milliseconds when nothing is assignable.
pub const DEFAULT_ASSIGN_IDLE_MS: u64 = 10;

/// Environment variable prefix for overrides.
const ENV_PREFIX: &str = "OUTRIDER";

/// Dispatch engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-worker queue capacity (pending-send plus ack-pending).
    pub worker_queue_size: usize,
    /// Milliseconds between retransmissions of an unacked packet.
    pub retry_interval_ms: u64,
    /// Retransmissions before a packet is discarded and its record failed.
    pub max_retries: u32,
    /// Milliseconds between timeout-service ticks. Must be at least 100.
    pub tick_granularity_ms: u64,
    /// Consecutive HIGH/MEDIUM dispatches before LOW promotion.
    pub promote_after: u32,
    /// Maximum payload bytes per packet; larger records are chunked.
    pub max_packet_bytes: usize,
    /// Scheduler idle wait in milliseconds when no work is assignable.
    pub assign_idle_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_queue_size: DEFAULT_WORKER_QUEUE_SIZE,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            tick_granularity_ms: DEFAULT_TICK_GRANULARITY_MS,
            promote_after: DEFAULT_PROMOTE_AFTER,
            max_packet_bytes: DEFAULT_MAX_PACKET_BYTES,
            assign_idle_ms: DEFAULT_ASSIGN_IDLE_MS,
        }
    }
}

impl DispatchConfig {
    /// Retransmission interval as a [`Duration`].
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Timer tick granularity as a [`Duration`].
    pub const fn tick_granularity(&self) -> Duration {
        Duration::from_millis(self.tick_granularity_ms)
    }

    /// Scheduler idle wait as a [`Duration`].
    pub const fn assign_idle(&self) -> Duration {
        Duration::from_millis(self.assign_idle_ms)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] describing the first violated
    /// constraint.
    pub fn validate(&self) -> Result<()> {
        if self.worker_queue_size < 2 {
            return Err(Error::Configuration {
                message: format!(
                    "worker_queue_size must be at least 2, got {}",
                    self.worker_queue_size
                ),
            });
        }
        if self.worker_queue_size > 256 {
            // The ack queue is scanned linearly; larger capacities need a
            // secondary id index before they are safe to enable.
            return Err(Error::Configuration {
                message: format!(
                    "worker_queue_size above 256 is unsupported, got {}",
                    self.worker_queue_size
                ),
            });
        }
        if self.tick_granularity_ms < 100 {
            return Err(Error::Configuration {
                message: format!(
                    "tick_granularity_ms must be at least 100, got {}",
                    self.tick_granularity_ms
                ),
            });
        }
        if self.retry_interval_ms == 0 {
            return Err(Error::Configuration {
                message: "retry_interval_ms must be non-zero".to_string(),
            });
        }
        if self.promote_after == 0 {
            return Err(Error::Configuration {
                message: "promote_after must be non-zero".to_string(),
            });
        }
        if self.max_packet_bytes == 0 {
            return Err(Error::Configuration {
                message: "max_packet_bytes must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Parse a configuration from TOML text and validate it.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] on parse or validation failure.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| Error::Configuration { message: format!("failed to parse TOML: {e}") })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file, apply `OUTRIDER_*` environment overrides,
    /// and validate the result.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the file cannot be read, parsed,
    /// or fails validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading dispatch configuration");

        let text = std::fs::read_to_string(path).map_err(|e| Error::Configuration {
            message: format!("failed to read {}: {e}", path.display()),
        })?;

        let mut config: Self = toml::from_str(&text)
            .map_err(|e| Error::Configuration { message: format!("failed to parse TOML: {e}") })?;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `OUTRIDER_*` environment overrides to numeric fields.
    pub fn apply_env_overrides(&mut self) {
        read_env("WORKER_QUEUE_SIZE", &mut self.worker_queue_size);
        read_env("RETRY_INTERVAL_MS", &mut self.retry_interval_ms);
        read_env("MAX_RETRIES", &mut self.max_retries);
        read_env("TICK_GRANULARITY_MS", &mut self.tick_granularity_ms);
        read_env("PROMOTE_AFTER", &mut self.promote_after);
        read_env("MAX_PACKET_BYTES", &mut self.max_packet_bytes);
        read_env("ASSIGN_IDLE_MS", &mut self.assign_idle_ms);
    }
}

fn read_env<T: std::str::FromStr>(key: &str, target: &mut T) {
    let name = format!("{ENV_PREFIX}_{key}");
    if let Ok(raw) = env::var(&name) {
        if let Ok(value) = raw.parse() {
            debug!(var = %name, value = %raw, "applied environment override");
            *target = value;
        }
    }
}
