//! Observable connection state.
//!
//! The link driver is the only writer. Every other component reads snapshots
//! or subscribes to changes through a `watch` channel.

use crate::endpoint::Endpoint;
use devlink_wire::InboundFrame;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Frame counters for the link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Frames decoded and dispatched
    pub frames_received: u64,
    /// Frames dropped because they were not valid JSON
    pub frames_dropped: u64,
    /// Successful socket opens
    pub connects: u64,
}

/// Snapshot of the link
#[derive(Debug, Clone)]
pub struct ConnectionState {
    /// Socket is open
    pub connected: bool,
    /// Socket open is in progress
    pub connecting: bool,
    /// Last failure reason
    pub error: Option<String>,
    /// Consecutive failed attempts since the last successful connection
    pub attempt_count: u32,
    /// Ceiling on automatic retries
    pub max_attempts: u32,
    /// Current target address
    pub endpoint: Endpoint,
    /// Last successfully decoded inbound frame
    pub last_message: Option<Arc<InboundFrame>>,
    /// A backoff timer is pending
    pub retry_scheduled: bool,
    /// Frame counters
    pub stats: LinkStats,
}

/// User-facing status derived from [`ConnectionState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// No socket, nothing pending
    Idle,
    /// Opening a socket
    Connecting,
    /// Socket open
    Connected,
    /// Waiting to retry after a failure
    Retrying {
        /// Failures so far
        attempt: u32,
        /// Ceiling on retries
        max_attempts: u32,
    },
    /// Retries exhausted; needs a manual reconnect or a new endpoint
    Failed {
        /// Failures recorded
        attempts: u32,
    },
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Idle => write!(f, "idle"),
            LinkStatus::Connecting => write!(f, "connecting"),
            LinkStatus::Connected => write!(f, "connected"),
            LinkStatus::Retrying {
                attempt,
                max_attempts,
            } => write!(f, "retrying ({}/{})", attempt, max_attempts),
            LinkStatus::Failed { attempts } => write!(f, "failed after {} attempts", attempts),
        }
    }
}

impl ConnectionState {
    /// Initial state for a link targeting `endpoint`
    pub fn new(endpoint: Endpoint, max_attempts: u32) -> Self {
        Self {
            connected: false,
            connecting: false,
            error: None,
            attempt_count: 0,
            max_attempts,
            endpoint,
            last_message: None,
            retry_scheduled: false,
            stats: LinkStats::default(),
        }
    }

    /// Retries are exhausted
    pub fn is_terminal(&self) -> bool {
        !self.connected
            && !self.connecting
            && !self.retry_scheduled
            && self.error.is_some()
            && self.attempt_count >= self.max_attempts
    }

    /// Status indicator value
    pub fn status(&self) -> LinkStatus {
        if self.connected {
            LinkStatus::Connected
        } else if self.connecting {
            LinkStatus::Connecting
        } else if self.retry_scheduled {
            LinkStatus::Retrying {
                attempt: self.attempt_count,
                max_attempts: self.max_attempts,
            }
        } else if self.is_terminal() {
            LinkStatus::Failed {
                attempts: self.attempt_count,
            }
        } else {
            LinkStatus::Idle
        }
    }
}

/// Shared, observable home of the [`ConnectionState`]
#[derive(Debug, Clone)]
pub struct StateStore {
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl StateStore {
    /// Create a store holding `initial`
    pub fn new(initial: ConnectionState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Clone of the current state
    pub fn snapshot(&self) -> ConnectionState {
        self.tx.borrow().clone()
    }

    /// Receiver notified on every change
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Socket is open
    pub fn connected(&self) -> bool {
        self.tx.borrow().connected
    }

    /// Socket open in progress
    pub fn connecting(&self) -> bool {
        self.tx.borrow().connecting
    }

    /// Last failure reason
    pub fn error(&self) -> Option<String> {
        self.tx.borrow().error.clone()
    }

    /// Consecutive failed attempts
    pub fn attempt_count(&self) -> u32 {
        self.tx.borrow().attempt_count
    }

    /// Ceiling on automatic retries
    pub fn max_attempts(&self) -> u32 {
        self.tx.borrow().max_attempts
    }

    /// Current target address
    pub fn endpoint(&self) -> Endpoint {
        self.tx.borrow().endpoint.clone()
    }

    /// Last decoded inbound frame
    pub fn last_message(&self) -> Option<Arc<InboundFrame>> {
        self.tx.borrow().last_message.clone()
    }

    /// Derived status indicator
    pub fn status(&self) -> LinkStatus {
        self.tx.borrow().status()
    }

    /// Apply a change and notify subscribers
    pub(crate) fn update<F>(&self, change: F)
    where
        F: FnOnce(&mut ConnectionState),
    {
        self.tx.send_modify(change);
    }
}
