//! Exponential backoff for transient job failures.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::ProcessorConfig;

/// `delay(n) = min(base · 2^n, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ProcessorConfig) -> Self {
        Self {
            base: config.retry_base,
            cap: config.retry_cap,
        }
    }

    /// Backoff before retry attempt `retry_count + 1`.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// When a job that has already been retried `retry_count` times may be
    /// claimed again.
    pub fn next_retry_at(&self, retry_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay(retry_count))
            .unwrap_or_else(|_| chrono::Duration::milliseconds(self.cap.as_millis() as i64));
        now + delay
    }
}
