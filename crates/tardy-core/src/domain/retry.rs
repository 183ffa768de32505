//! Retry policy (per task) and backoff (per transport).

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Per-task retry settings carried on the descriptor.
///
/// Retries are enabled iff `retry_count > 0`. `interval_secs == 0` leaves the
/// delay to the transport's backoff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub retry_count: u32,
    pub interval_secs: u64,
}

impl RetryPolicy {
    pub fn new(retry_count: u32, interval_secs: u64) -> Self {
        Self {
            retry_count,
            interval_secs,
        }
    }

    pub fn retries_enabled(&self) -> bool {
        self.retry_count > 0
    }

    /// Ceiling to put on the wire, `None` when retries are off.
    pub fn retry_max(&self) -> Option<u32> {
        self.retries_enabled().then_some(self.retry_count)
    }

    /// Fixed interval to put on the wire, `None` for transport backoff.
    pub fn retry_interval(&self) -> Option<u64> {
        (self.interval_secs > 0).then_some(self.interval_secs)
    }
}

/// Exponential backoff used by a transport when a message has no fixed
/// retry interval.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base_delay: Duration,

    pub multiplier: f64,

    /// Upper bound of the random extra delay added to each retry.
    pub jitter: Duration,

    /// Cap on the computed delay (before jitter).
    pub max_delay: Duration,
}

impl Backoff {
    /// 2s base, doubling, no jitter, capped at one hour.
    pub fn default_v1() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: Duration::ZERO,
            max_delay: Duration::from_secs(3600),
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempts` (1-indexed):
    /// `base_delay * multiplier^(attempts - 1)`, capped, plus jitter.
    ///
    /// Example with base_delay=2s, multiplier=2.0:
    /// - attempt 1: 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = if delay_secs.is_finite() {
            Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
        } else {
            self.max_delay
        };

        if self.jitter.is_zero() {
            return capped;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        capped + Duration::from_millis(extra)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::default_v1()
    }
}
