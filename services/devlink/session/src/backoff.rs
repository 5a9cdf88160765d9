//! Reconnection policy with bounded exponential backoff.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep, Sleep};

/// Decides if and when a failed or dropped connection is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Consecutive failures after which retrying stops
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the next retry given the failures so far, or `None` once
    /// the ceiling is reached.
    ///
    /// delay = min(base × 2^attempt_count, max)
    pub fn next_delay(&self, attempt_count: u32) -> Option<Duration> {
        if attempt_count >= self.max_attempts {
            return None;
        }
        let factor = 2u32.checked_pow(attempt_count).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }
}

/// Single pending retry timer, cancelable at any point
#[derive(Debug, Default)]
pub struct RetryTimer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl RetryTimer {
    /// Arm the timer, replacing any pending one
    pub fn schedule(&mut self, delay: Duration) {
        self.sleep = Some(Box::pin(sleep(delay)));
    }

    /// Disarm the timer
    pub fn cancel(&mut self) {
        self.sleep = None;
    }

    /// Whether a retry is pending
    pub fn is_pending(&self) -> bool {
        self.sleep.is_some()
    }

    /// Resolve when the pending retry is due; never resolves while disarmed.
    ///
    /// The timer disarms itself once fired.
    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.await;
                self.cancel();
            }
            None => pending::<()>().await,
        }
    }
}
