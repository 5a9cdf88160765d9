//! Command encoding, inbound frame decoding, and telemetry types for the washer device link.
//!
//! The device speaks text frames over a WebSocket. Outbound commands are either
//! bare tokens (`connect`, `start_cycle`, ...) or compact JSON objects keyed by
//! `action`. Inbound frames are JSON objects; those carrying telemetry decode
//! into [`TelemetryPacket`], anything else that parses is kept as an
//! [`InboundFrame::Unrecognized`] value.
//!
//! ## Wire Format
//!
//! ```text
//! outbound  connect                                   bare token, raw text
//! outbound  {"action":"toggle_gpio","pin":4,"state":0} structured command
//! inbound   {"timestamp":..,"gpio":[..],"sensors":{..},"cycle":{..},"cycle_data":[..]}
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod error;
pub mod frame;
pub mod telemetry;

// Re-export main types
pub use command::{Action, CycleUpload, OutboundCommand, Token};
pub use error::WireError;
pub use frame::{decode_frame, InboundFrame, TELEMETRY_KEYS};
pub use telemetry::{Component, CycleStatus, GpioState, Phase, Sensors, TelemetryPacket};
