//! Error types for export and configuration.

use std::time::Duration;
use thiserror::Error;

/// Reasons an export cycle or export call did not succeed.
///
/// A full queue is not represented here: dropping on overflow is counted by the
/// [`MetricsSink`](crate::MetricsSink), never reported to the producer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// Transport-layer error (connection refused, reset, request timeout)
    #[error("transport error: {0}")]
    Transport(String),
    /// The collector answered with a non-success status
    #[error("server responded with {status}: {message}")]
    Server { status: u16, message: String },
    /// All retry attempts exhausted
    #[error("all retry attempts exhausted after {attempts} tries: {last}")]
    RetriesExhausted { attempts: u32, last: Box<ExportError> },
    /// Export cycle exceeded its deadline
    #[error("export operation timed out")]
    Timeout,
    /// The exporter or pipeline has been shut down
    #[error("exporter has been shut down")]
    Shutdown,
    /// Batch could not be serialized
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Payload could not be compressed
    #[error("compression error: {0}")]
    Compression(String),
    /// Collection registration failed to produce a snapshot
    #[error("collection failed: {0}")]
    Collection(String),
    /// A previous export is still in flight
    #[error("exporter busy: previous export still in flight")]
    Busy,
}

impl ExportError {
    /// Default retry classification: network errors and the throttling /
    /// gateway statuses (429, 502, 503, 504).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Server { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Returns the HTTP status carried by this error, looking through
    /// [`ExportError::RetriesExhausted`].
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } => Some(*status),
            Self::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

/// Statuses retried by default.
pub const RETRYABLE_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// Returns `true` if `status` is one of [`RETRYABLE_STATUSES`].
#[inline]
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

/// Invalid configuration values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("max_export_batch_size ({batch}) must not exceed max_queue_size ({queue})")]
    BatchExceedsQueue { batch: usize, queue: usize },
    #[error("max_backoff ({max:?}) must not be less than initial_backoff ({initial:?})")]
    BackoffOrder { initial: Duration, max: Duration },
    #[error("backoff_multiplier must be a finite value >= 1.0, got {0}")]
    Multiplier(String),
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidEnv {
        key: String,
        value: String,
        reason: String,
    },
    #[error("no tokio runtime available; construct inside a runtime or pass a handle")]
    NoRuntime,
}
