//! Configuration for the batch processor and periodic reader.
//!
//! Both configs are plain structs with builder-style setters. They are checked
//! by [`BatchConfig::validate`] / [`ReaderConfig::validate`] when a processor
//! or reader is constructed, and can be seeded from the standard
//! `OTEL_BSP_*` / `OTEL_METRIC_EXPORT_*` environment variables.

use crate::error::ConfigError;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_BSP_SCHEDULE_DELAY: &str = "OTEL_BSP_SCHEDULE_DELAY";
pub const ENV_BSP_MAX_QUEUE_SIZE: &str = "OTEL_BSP_MAX_QUEUE_SIZE";
pub const ENV_BSP_MAX_EXPORT_BATCH_SIZE: &str = "OTEL_BSP_MAX_EXPORT_BATCH_SIZE";
pub const ENV_BSP_EXPORT_TIMEOUT: &str = "OTEL_BSP_EXPORT_TIMEOUT";
pub const ENV_METRIC_EXPORT_INTERVAL: &str = "OTEL_METRIC_EXPORT_INTERVAL";
pub const ENV_METRIC_EXPORT_TIMEOUT: &str = "OTEL_METRIC_EXPORT_TIMEOUT";

/// Configuration for [`BatchProcessor`](crate::BatchProcessor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Period between unconditional drain cycles.
    ///
    /// Default: 5s
    pub schedule_delay: Duration,

    /// Queue capacity; admission beyond this drops the record.
    ///
    /// Default: 2048
    pub max_queue_size: usize,

    /// Upper bound on records per export call. Must not exceed
    /// `max_queue_size`.
    ///
    /// Default: 512
    pub max_export_batch_size: usize,

    /// Wall-clock bound on one export cycle, retries included.
    ///
    /// Default: 30s
    pub export_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            schedule_delay: Duration::from_secs(5),
            max_queue_size: 2048,
            max_export_batch_size: 512,
            export_timeout: Duration::from_secs(30),
        }
    }
}

impl BatchConfig {
    pub fn with_schedule_delay(mut self, delay: Duration) -> Self {
        self.schedule_delay = delay;
        self
    }

    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    pub fn with_max_export_batch_size(mut self, size: usize) -> Self {
        self.max_export_batch_size = size;
        self
    }

    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    /// Queue length at which `add` requests an immediate export cycle.
    #[inline]
    pub fn watermark(&self) -> usize {
        self.max_queue_size / 2
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schedule_delay.is_zero() {
            return Err(ConfigError::Zero {
                field: "schedule_delay",
            });
        }
        if self.max_queue_size == 0 {
            return Err(ConfigError::Zero {
                field: "max_queue_size",
            });
        }
        if self.max_export_batch_size == 0 {
            return Err(ConfigError::Zero {
                field: "max_export_batch_size",
            });
        }
        if self.export_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "export_timeout",
            });
        }
        if self.max_export_batch_size > self.max_queue_size {
            return Err(ConfigError::BatchExceedsQueue {
                batch: self.max_export_batch_size,
                queue: self.max_queue_size,
            });
        }
        Ok(())
    }

    /// Defaults overridden by `OTEL_BSP_*` variables from the process
    /// environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `OTEL_BSP_*` values returned by `lookup`.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(delay) = env_millis(&lookup, ENV_BSP_SCHEDULE_DELAY)? {
            config.schedule_delay = delay;
        }
        if let Some(size) = env_value(&lookup, ENV_BSP_MAX_QUEUE_SIZE)? {
            config.max_queue_size = size;
        }
        if let Some(size) = env_value(&lookup, ENV_BSP_MAX_EXPORT_BATCH_SIZE)? {
            config.max_export_batch_size = size;
        }
        if let Some(timeout) = env_millis(&lookup, ENV_BSP_EXPORT_TIMEOUT)? {
            config.export_timeout = timeout;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Configuration for [`PeriodicReader`](crate::PeriodicReader).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Period between collect-and-export cycles.
    ///
    /// Default: 60s
    pub export_interval: Duration,

    /// Bound on one export.
    ///
    /// Default: 30s
    pub export_timeout: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            export_interval: Duration::from_secs(60),
            export_timeout: Duration::from_secs(30),
        }
    }
}

impl ReaderConfig {
    pub fn with_export_interval(mut self, interval: Duration) -> Self {
        self.export_interval = interval;
        self
    }

    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.export_interval.is_zero() {
            return Err(ConfigError::Zero {
                field: "export_interval",
            });
        }
        if self.export_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "export_timeout",
            });
        }
        Ok(())
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(interval) = env_millis(&lookup, ENV_METRIC_EXPORT_INTERVAL)? {
            config.export_interval = interval;
        }
        if let Some(timeout) = env_millis(&lookup, ENV_METRIC_EXPORT_TIMEOUT)? {
            config.export_timeout = timeout;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Parses `key` from `lookup` as `T`. Blank values count as unset.
pub fn env_value<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::InvalidEnv {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        })
}

/// Parses `key` as a whole number of milliseconds.
pub fn env_millis<F>(lookup: &F, key: &str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(env_value::<u64, F>(lookup, key)?.map(Duration::from_millis))
}
