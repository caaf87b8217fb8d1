//! Bounded exponential backoff for transient transfer failures.

use std::time::Duration;

use super::UploadError;
use crate::config::UploadConfig;

/// Retry policy applied per chunk and per digest call.
///
/// Delays grow exponentially from the base delay up to the cap, with a
/// random jitter of up to half the computed delay to keep concurrent
/// workers from retrying in lockstep.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(
            config.max_retry_attempts,
            config.base_retry_delay,
            config.max_retry_delay,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt is allowed for the given error.
    pub fn should_retry(&self, attempt: u32, error: &UploadError) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }

    /// Backoff delay before the given attempt (1-based), jittered.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential =
            self.base_delay.as_millis() as u64 * 2_u64.pow(attempt.saturating_sub(1).min(16));
        let capped = exponential.min(self.max_delay.as_millis() as u64);
        let jitter = (rand::random::<f64>() * capped as f64 / 2.0) as u64;
        Duration::from_millis(capped + jitter)
    }
}
