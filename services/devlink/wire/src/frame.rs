//! Inbound frame decoding.

use crate::error::WireError;
use crate::telemetry::TelemetryPacket;
use serde_json::Value;
use tracing::{debug, trace};

/// Top-level keys that mark an object as a telemetry packet
pub const TELEMETRY_KEYS: &[&str] = &["gpio", "sensors", "cycle", "cycle_data", "cycleData"];

/// A successfully parsed inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Frame matching the telemetry schema
    Telemetry(TelemetryPacket),
    /// Valid JSON that is not telemetry (acks, status strings, unknown pushes)
    Unrecognized(Value),
}

impl InboundFrame {
    /// Telemetry packet carried by the frame, if any
    pub fn telemetry(&self) -> Option<&TelemetryPacket> {
        match self {
            InboundFrame::Telemetry(packet) => Some(packet),
            InboundFrame::Unrecognized(_) => None,
        }
    }

    /// Whether the frame is a telemetry packet
    pub fn is_telemetry(&self) -> bool {
        matches!(self, InboundFrame::Telemetry(_))
    }
}

/// Decode one text frame.
///
/// Invalid JSON is an error. Objects carrying any of [`TELEMETRY_KEYS`] are
/// decoded into a [`TelemetryPacket`]; if the fields have the wrong types the
/// frame is kept as [`InboundFrame::Unrecognized`].
pub fn decode_frame(text: &str) -> Result<InboundFrame, WireError> {
    let value: Value = serde_json::from_str(text).map_err(WireError::Malformed)?;

    let looks_like_telemetry = value
        .as_object()
        .map(|object| TELEMETRY_KEYS.iter().any(|key| object.contains_key(*key)))
        .unwrap_or(false);

    if !looks_like_telemetry {
        trace!("Inbound frame is not telemetry");
        return Ok(InboundFrame::Unrecognized(value));
    }

    match serde_json::from_value::<TelemetryPacket>(value.clone()) {
        Ok(packet) => Ok(InboundFrame::Telemetry(packet)),
        Err(e) => {
            debug!("Telemetry-shaped frame did not match schema: {}", e);
            Ok(InboundFrame::Unrecognized(value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_telemetry() {
        let frame = decode_frame(
            r#"{"timestamp":1200,"gpio":[{"pin":4,"state":1},{"pin":5,"state":0}],
                "sensors":{"rpm":640.0,"pressure_freq":23950.0,"sensor_error":false}}"#,
        )
        .unwrap();

        let packet = frame.telemetry().expect("telemetry frame");
        assert_eq!(packet.timestamp, 1200);
        assert_eq!(packet.gpio.len(), 2);
        assert_eq!(packet.gpio[0].state, 1);
        assert_eq!(packet.sensors.rpm, 640.0);
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(matches!(decode_frame("{\"gpio\": ["), Err(WireError::Malformed(_))));
        assert!(decode_frame("").is_err());
    }

    #[test]
    fn test_non_telemetry_is_unrecognized() {
        let frame = decode_frame(r#"{"status":"ok","message":"cycle stored"}"#).unwrap();
        assert!(!frame.is_telemetry());

        let frame = decode_frame(r#""pong""#).unwrap();
        assert_eq!(frame, InboundFrame::Unrecognized(Value::String("pong".into())));
    }

    #[test]
    fn test_wrong_types_fall_back_to_unrecognized() {
        let frame = decode_frame(r#"{"gpio":"all off"}"#).unwrap();
        assert!(matches!(frame, InboundFrame::Unrecognized(_)));
    }
}
