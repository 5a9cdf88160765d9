//! Typed telemetry projection, history buffers, and pin control for the washer
//! device link.
//!
//! ## Example
//!
//! ```rust,no_run
//! use devlink_session::{DeviceLink, Endpoint, LinkConfig, WebSocketConnector};
//! use devlink_telemetry::TelemetryProjection;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let endpoint = Endpoint::parse("ws://192.168.4.1:81/ws")?;
//! let (link, _driver) = DeviceLink::spawn(LinkConfig::new(endpoint), WebSocketConnector::default());
//! let telemetry = TelemetryProjection::attach(&link, 100);
//!
//! if let Some(phase) = telemetry.current_phase() {
//!     println!("{} at {} rpm", phase.name, telemetry.rpm());
//! }
//! telemetry.toggle_pin(4);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod history;
pub mod projection;

// Re-export main types
pub use history::{HistoryBuffer, HistorySample, DEFAULT_HISTORY_CAPACITY, MAX_HISTORY_CAPACITY};
pub use projection::{TelemetryProjection, PROJECTION_KEY};
