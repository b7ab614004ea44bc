//! Log Throttling
//!
//! A collector that is down makes every export cycle fail. Logging each
//! failure would flood the host application's logs, so failure diagnostics go
//! through a [`ThrottledLogger`]:
//!
//! - up to 5 messages per minute are logged normally;
//! - once that budget is exceeded a one-time notice is emitted and the logger
//!   drops to 1 message per minute for the rest of its life.
//!
//! Both budgets are [`TokenBucket`]s. Time is passed in explicitly by the
//! `*_at` variants so tests do not need to sleep.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::warn;

/// Token bucket refilled continuously at `rate` tokens per `per`.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket holding `rate` tokens, refilled at `rate` per `per`.
    ///
    /// # Panics
    ///
    /// Panics if `rate` is zero or `per` is zero.
    pub fn new(rate: u32, per: Duration) -> Self {
        assert!(rate > 0, "rate must be positive");
        assert!(!per.is_zero(), "period must be positive");
        let capacity = rate as f64;
        Self {
            capacity,
            refill_per_sec: capacity / per.as_secs_f64(),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Takes one token if available.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Takes one token if available at `now`.
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        state.last_refill = state.last_refill.max(now);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Rate-limited `warn!` logging for repeated failures.
#[derive(Debug)]
pub struct ThrottledLogger {
    fast: TokenBucket,
    throttled: TokenBucket,
    is_throttled: AtomicBool,
}

impl ThrottledLogger {
    const FAST_RATE: u32 = 5;
    const THROTTLED_RATE: u32 = 1;
    const PERIOD: Duration = Duration::from_secs(60);

    pub fn new() -> Self {
        Self {
            fast: TokenBucket::new(Self::FAST_RATE, Self::PERIOD),
            throttled: TokenBucket::new(Self::THROTTLED_RATE, Self::PERIOD),
            is_throttled: AtomicBool::new(false),
        }
    }

    /// Returns whether a message may be logged now.
    pub fn should_log(&self) -> bool {
        self.should_log_at(Instant::now())
    }

    /// Returns whether a message may be logged at `now`.
    pub fn should_log_at(&self, now: Instant) -> bool {
        if self.is_throttled.load(Ordering::Acquire) {
            return self.throttled.try_acquire_at(now);
        }
        if self.fast.try_acquire_at(now) {
            return true;
        }
        if !self.is_throttled.swap(true, Ordering::AcqRel) {
            warn!("too many log messages detected; will only log once per minute from now on");
        }
        self.throttled.try_acquire_at(now)
    }

    /// Returns `true` once the fast budget has been exhausted.
    pub fn is_throttled(&self) -> bool {
        self.is_throttled.load(Ordering::Acquire)
    }

    /// Logs `message` at WARN level if the budget allows.
    pub fn warn(&self, message: impl fmt::Display) {
        if self.should_log() {
            warn!("{}", message);
        }
    }
}

impl Default for ThrottledLogger {
    fn default() -> Self {
        Self::new()
    }
}
