//! Keep-alive probing while the link is open.
//!
//! The device never answers a ping in a way this layer tracks, so silence is
//! not treated as a failure. The probe only keeps the socket from looking
//! idle to the device.

use devlink_wire::OutboundCommand;
use std::future::pending;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::warn;

/// Shortest probe period; shorter requests are raised to this
pub const MIN_PROBE_PERIOD: Duration = Duration::from_millis(100);

/// Build the keep-alive command
pub fn build_ping() -> OutboundCommand {
    OutboundCommand::ping()
}

/// Periodic ping timer, running only while connected
#[derive(Debug)]
pub struct LivenessProber {
    period: Duration,
    interval: Option<Interval>,
}

impl LivenessProber {
    /// Create a stopped prober with the given period, raised to
    /// [`MIN_PROBE_PERIOD`] if shorter
    pub fn new(period: Duration) -> Self {
        if period < MIN_PROBE_PERIOD {
            warn!(
                "Keep-alive period {:?} is too short, using {:?}",
                period, MIN_PROBE_PERIOD
            );
        }
        Self {
            period: period.max(MIN_PROBE_PERIOD),
            interval: None,
        }
    }

    /// Start probing; the first tick fires one period from now
    pub fn start(&mut self) {
        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    /// Stop probing
    pub fn stop(&mut self) {
        self.interval = None;
    }

    /// Whether the prober is running
    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Probe period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Resolve on the next probe tick; never resolves while stopped
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => pending::<()>().await,
        }
    }
}
