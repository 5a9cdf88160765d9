//! Telemetry packet types pushed by the device.
//!
//! Every field defaults when absent. A packet is always read on its own; it
//! never inherits values from the packet before it.

use serde::{Deserialize, Deserializer, Serialize};

/// One telemetry packet as reported by the device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryPacket {
    /// Device-reported packet time in milliseconds
    #[serde(alias = "timestampMs", alias = "timestamp_ms")]
    pub timestamp: u64,
    /// Level of every known digital output at emission time
    pub gpio: Vec<GpioState>,
    /// Sensor readings
    pub sensors: Sensors,
    /// Running-cycle status
    pub cycle: CycleStatus,
    /// Phase layout of the cycle the device is running, if any
    #[serde(alias = "cycleData", skip_serializing_if = "Option::is_none")]
    pub cycle_data: Option<Vec<Phase>>,
}

/// Raw level of a single GPIO pin.
///
/// The wiring is inverted: a level of 1 means the output is logically off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpioState {
    /// Pin number
    pub pin: u32,
    /// Raw reported level (0 or 1)
    pub state: u8,
}

impl GpioState {
    /// Whether the output is logically on (raw level 0)
    pub fn is_on(&self) -> bool {
        self.state == 0
    }
}

/// Sensor block of a telemetry packet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sensors {
    /// Drum speed
    pub rpm: f64,
    /// Pressure sensor frequency
    #[serde(alias = "pressureFrequency", alias = "pressure_frequency")]
    pub pressure_freq: f64,
    /// Sensor fault flag
    #[serde(alias = "sensorError")]
    pub sensor_error: bool,
}

/// Cycle block of a telemetry packet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleStatus {
    /// Whether a cycle is running
    pub running: bool,
    /// 1-based index of the running phase, 0 when idle
    #[serde(alias = "currentPhaseIndex", alias = "current_phase")]
    pub current_phase_index: u32,
    /// Name of the running phase
    #[serde(alias = "currentPhaseName", alias = "phase_name")]
    pub current_phase_name: String,
    /// Number of phases in the running cycle
    #[serde(alias = "totalPhases")]
    pub total_phases: u32,
    /// Time spent in the current phase
    #[serde(alias = "phaseElapsedMs", alias = "phase_elapsed")]
    pub phase_elapsed_ms: u64,
    /// Planned duration of the current phase
    #[serde(alias = "phaseTotalDurationMs", alias = "phase_total_duration")]
    pub phase_total_duration_ms: u64,
    /// Device time at which the cycle started
    #[serde(alias = "cycleStartTime", alias = "cycle_start_time_ms")]
    pub cycle_start_time: u64,
}

/// Phase of a cycle, as uploaded with `write_json` and echoed in `cycle_data`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Phase {
    /// Phase identifier
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    /// Display name
    pub name: String,
    /// Display color
    pub color: String,
    /// Offset of the phase from cycle start in milliseconds
    #[serde(alias = "start_time")]
    pub start_time: u64,
    /// Components driven during the phase
    pub components: Vec<Component>,
}

/// Component activation inside a phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Component {
    /// Component instance identifier
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    /// Display label
    pub label: String,
    /// Identifier of the hardware component type
    #[serde(alias = "comp_id", deserialize_with = "string_or_number")]
    pub comp_id: String,
    /// Start offset within the phase in milliseconds
    #[serde(alias = "startMs", alias = "start_ms")]
    pub start: u64,
    /// Activation length in milliseconds
    #[serde(alias = "durationMs", alias = "duration_ms")]
    pub duration: u64,
    /// Whether the component drives the motor
    #[serde(alias = "has_motor")]
    pub has_motor: bool,
}

impl Component {
    /// Whether the component is active at `elapsed_ms` into its phase
    pub fn is_active_at(&self, elapsed_ms: u64) -> bool {
        elapsed_ms >= self.start && elapsed_ms < self.start.saturating_add(self.duration)
    }
}

/// Accept identifiers sent either as strings or as bare numbers
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Unsigned(n) => n.to_string(),
        Id::Signed(n) => n.to_string(),
        Id::Float(n) => n.to_string(),
    })
}
