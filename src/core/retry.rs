//! Retry policy for failed jobs.
//!
//! Redelivery by the stream is the retry mechanism; the policy only decides
//! how long a worker waits after a failure and when a job is handed to the
//! dead-letter sink instead of being left pending again. The default retries
//! forever without waiting.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do with a job that just failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Leave the entry pending and wait before claiming again
    Retry { delay: Duration },

    /// Give up: dead-letter and acknowledge
    GiveUp,
}

/// Retry policy for failed jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of deliveries (including the first). Unlimited when unset.
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Delay after the first failure in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_initial_delay() -> u64 {
    0
}
fn default_max_delay() -> u64 {
    60_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay after a failed attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms));
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }

    /// Decide the fate of a job that failed on its `attempt`-th delivery
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if self.should_retry(attempt) {
            RetryDecision::Retry {
                delay: self.delay_for_attempt(attempt),
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}
