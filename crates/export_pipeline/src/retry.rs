//! Retry Policy
//!
//! Immutable retry governance shared by every export attempt of a transport:
//!
//! - [`RetryPolicy`]: attempt limit, exponential backoff bounds, optional full
//!   jitter, and the predicate deciding which failures are retryable.
//! - [`RetryPolicy::execute`]: drives an attempt closure until it succeeds,
//!   fails non-retryably, or runs out of attempts.
//!
//! Backoff before retry `n` (1-based, counting failed attempts) is
//! `min(max_backoff, initial_backoff * backoff_multiplier^(n-1))`. With jitter
//! enabled the actual delay is drawn uniformly from `[0, that ceiling]`.

use crate::error::{ConfigError, ExportError};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Classifies failures as retryable.
pub type RetryPredicate = Arc<dyn Fn(&ExportError) -> bool + Send + Sync>;

/// Retry configuration with validated invariants.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    backoff_multiplier: f64,
    jitter: bool,
    retryable: Option<RetryPredicate>,
}

impl RetryPolicy {
    /// Creates a policy, validating `max_attempts >= 1`, `initial_backoff > 0`,
    /// `max_backoff >= initial_backoff` and `backoff_multiplier >= 1`.
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::Zero {
                field: "max_attempts",
            });
        }
        if initial_backoff.is_zero() {
            return Err(ConfigError::Zero {
                field: "initial_backoff",
            });
        }
        if max_backoff < initial_backoff {
            return Err(ConfigError::BackoffOrder {
                initial: initial_backoff,
                max: max_backoff,
            });
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(ConfigError::Multiplier(backoff_multiplier.to_string()));
        }

        Ok(Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
            jitter: true,
            retryable: None,
        })
    }

    /// A policy that performs exactly one attempt.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Enables or disables full jitter (enabled by default).
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replaces the default retry classification
    /// ([`ExportError::is_retryable`]).
    pub fn with_retryable<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ExportError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Some(Arc::new(predicate));
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// Returns `true` if `error` should be retried.
    pub fn is_retryable(&self, error: &ExportError) -> bool {
        match &self.retryable {
            Some(predicate) => predicate(error),
            None => error.is_retryable(),
        }
    }

    /// Upper bound of the delay after failed attempt `attempt` (1-based).
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Actual delay after failed attempt `attempt`, jittered if enabled.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt);
        if !self.jitter {
            return ceiling;
        }
        let secs = rand::thread_rng().gen_range(0.0..=ceiling.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Runs `attempt_fn` until it succeeds, returns a non-retryable error, or
    /// `max_attempts` attempts have been made.
    ///
    /// The closure receives the 1-based attempt number. When attempts run out
    /// after more than one try, the last error is wrapped in
    /// [`ExportError::RetriesExhausted`].
    pub async fn execute<T, F, Fut>(&self, mut attempt_fn: F) -> Result<T, ExportError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ExportError>>,
    {
        let mut attempt = 1;
        loop {
            debug_assert!(
                attempt <= self.max_attempts,
                "attempt {} exceeds max_attempts {}",
                attempt,
                self.max_attempts
            );

            let error = match attempt_fn(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "export succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !self.is_retryable(&error) {
                return Err(error);
            }
            if attempt >= self.max_attempts {
                if self.max_attempts == 1 {
                    return Err(error);
                }
                return Err(ExportError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.delay_for_attempt(attempt);
            debug_assert!(delay <= self.max_backoff);
            debug!(attempt, ?delay, %error, "retryable export failure, backing off");
            sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            jitter: true,
            retryable: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .field("custom_retryable", &self.retryable.is_some())
            .finish()
    }
}
