//! Retry/backoff policy shared by startup retries and crash recovery.

use std::time::Duration;

use cr_domain::config::SupervisorConfig;

/// Exponential backoff without jitter.
///
/// Attempt numbering starts at 1: the first retry waits `initial_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(cfg: &SupervisorConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(cfg.initial_backoff_ms),
            max_delay: Duration::from_millis(cfg.max_backoff_ms),
            factor: cfg.backoff_factor,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.initial_delay, self.factor, self.max_delay)
    }
}

/// `min(initial * factor^(attempt-1), max)`. Attempt 0 is treated as 1.
pub fn backoff_delay(attempt: u32, initial: Duration, factor: f64, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let raw_ms = initial.as_millis() as f64 * factor.powi(exponent);
    let max_ms = max.as_millis() as f64;
    // NaN/inf from a huge exponent collapse to the cap.
    let capped_ms = if raw_ms.is_finite() { raw_ms.min(max_ms) } else { max_ms };
    Duration::from_millis(capped_ms.max(0.0) as u64)
}

/// Progress of one startup or recovery sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
    pub total_delay: Duration,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the next attempt and return its number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    pub fn record_delay(&mut self, delay: Duration) {
        self.total_delay += delay;
    }

    pub fn exhausted(&self, max_attempts: u32) -> bool {
        self.attempt >= max_attempts
    }
}
