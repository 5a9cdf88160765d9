//! WebSocket transport, reconnect backoff, keepalive, state store, and message
//! fan-out for the washer device link.
//!
//! One [`DeviceLink`] owns the single connection to a washer controller. The
//! link reconnects on abnormal loss with bounded exponential backoff, probes
//! the socket while it is open, publishes its [`ConnectionState`] to any number
//! of observers, and hands every decoded inbound frame to each registered
//! handler.
//!
//! ## Features
//!
//! - **Transport**: WebSocket connector plus an in-memory one for tests
//! - **Backoff**: 1s, 2s, 4s, ... capped at 30s, at most 5 retries by default
//! - **Keepalive**: `{"action":"ping"}` every 30s while connected
//! - **State Store**: `watch`-backed snapshots and change notification
//! - **Fan-out**: keyed handlers, failures isolated per handler
//!
//! ## Example
//!
//! ```rust,no_run
//! use devlink_session::{DeviceLink, Endpoint, LinkConfig, WebSocketConnector};
//! use devlink_wire::Token;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let endpoint = Endpoint::parse("ws://192.168.4.1:81/ws")?;
//! let (link, _driver) = DeviceLink::spawn(LinkConfig::new(endpoint), WebSocketConnector::default());
//!
//! link.register("printer", |frame| {
//!     if let Some(packet) = frame.telemetry() {
//!         println!("rpm {}", packet.sensors.rpm);
//!     }
//!     Ok(())
//! });
//!
//! let mut state = link.subscribe();
//! state.wait_for(|s| s.connected).await?;
//! link.send(Token::StartCycle);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod endpoint;
pub mod error;
pub mod fanout;
pub mod keepalive;
pub mod manager;
pub mod state;
pub mod transport;

// Re-export main types
pub use backoff::{ReconnectPolicy, RetryTimer};
pub use endpoint::Endpoint;
pub use error::{LinkError, TransportError};
pub use fanout::{DispatchReport, FanoutRegistry, MessageHandler};
pub use keepalive::{build_ping, LivenessProber, MIN_PROBE_PERIOD};
pub use manager::{DeviceLink, LinkConfig, LinkDriver};
pub use state::{ConnectionState, LinkStats, LinkStatus, StateStore};
pub use transport::memory::{DevicePeer, MemoryConnector};
pub use transport::{
    Connection, Connector, OutboundFrame, TransportEvent, WebSocketConnector, CLOSE_ABNORMAL,
    CLOSE_NORMAL,
};
