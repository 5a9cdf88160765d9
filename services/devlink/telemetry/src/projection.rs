//! Typed views over the device's telemetry stream.
//!
//! The projection subscribes to a [`DeviceLink`] through its fan-out registry
//! and never touches the transport, except to send `toggle_gpio` on behalf of
//! [`TelemetryProjection::toggle_pin`].

use crate::history::{HistoryBuffer, HistorySample};
use devlink_session::DeviceLink;
use devlink_wire::{Component, GpioState, InboundFrame, OutboundCommand, Phase, TelemetryPacket};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

/// Fan-out key the projection registers under
pub const PROJECTION_KEY: &str = "telemetry-projection";

#[derive(Debug)]
struct ProjectionState {
    current: Option<TelemetryPacket>,
    rpm: HistoryBuffer,
    pressure: HistoryBuffer,
    packets: u64,
}

/// Accumulated telemetry of one device link
#[derive(Debug, Clone)]
pub struct TelemetryProjection {
    state: Arc<RwLock<ProjectionState>>,
    link: DeviceLink,
}

impl TelemetryProjection {
    /// Create a projection and start folding the link's inbound frames.
    ///
    /// Attaching a second projection to the same link replaces the first.
    pub fn attach(link: &DeviceLink, history_capacity: usize) -> Self {
        let projection = Self {
            state: Arc::new(RwLock::new(ProjectionState {
                current: None,
                rpm: HistoryBuffer::new(history_capacity),
                pressure: HistoryBuffer::new(history_capacity),
                packets: 0,
            })),
            link: link.clone(),
        };

        let folder = projection.clone_state();
        link.register(PROJECTION_KEY, move |frame| {
            fold_into(&folder, frame);
            Ok(())
        });
        debug!("Telemetry projection attached (history {})", history_capacity);

        projection
    }

    /// Stop folding frames; accumulated state is kept
    pub fn detach(&self) -> bool {
        self.link.unregister(PROJECTION_KEY)
    }

    /// Fold one inbound frame; anything but telemetry is ignored
    pub fn fold(&self, frame: &InboundFrame) {
        fold_into(&self.state, frame);
    }

    /// Most recent packet
    pub fn current(&self) -> Option<TelemetryPacket> {
        self.read().current.clone()
    }

    /// Packets folded since attach
    pub fn packets(&self) -> u64 {
        self.read().packets
    }

    /// Drum speed, 0 before the first packet
    pub fn rpm(&self) -> f64 {
        self.with_current(|p| p.sensors.rpm).unwrap_or_default()
    }

    /// Pressure sensor frequency, 0 before the first packet
    pub fn pressure(&self) -> f64 {
        self.with_current(|p| p.sensors.pressure_freq)
            .unwrap_or_default()
    }

    /// Whether the device flagged a sensor fault in the last packet
    pub fn sensor_error(&self) -> bool {
        self.with_current(|p| p.sensors.sensor_error)
            .unwrap_or_default()
    }

    /// Name of the running phase, empty when idle
    pub fn phase_name(&self) -> String {
        self.with_current(|p| p.cycle.current_phase_name.clone())
            .unwrap_or_default()
    }

    /// Whether a cycle is running, false before the first packet
    pub fn is_running(&self) -> bool {
        self.with_current(|p| p.cycle.running).unwrap_or_default()
    }

    /// Raw pin levels of the last packet
    pub fn gpio(&self) -> Vec<GpioState> {
        self.with_current(|p| p.gpio.clone()).unwrap_or_default()
    }

    /// Raw level last reported for `pin`
    pub fn pin_state(&self, pin: u32) -> Option<u8> {
        self.with_current(|p| p.gpio.iter().find(|g| g.pin == pin).map(|g| g.state))
            .flatten()
    }

    /// Phase the device is running.
    ///
    /// The device reports a 1-based index, so index 2 resolves to the second
    /// entry of `cycle_data`.
    pub fn current_phase(&self) -> Option<Phase> {
        self.with_current(current_phase_of).flatten()
    }

    /// Fraction of the current phase completed, in [0, 1]
    pub fn phase_progress(&self) -> Option<f64> {
        self.with_current(|p| {
            let total = p.cycle.phase_total_duration_ms;
            if total == 0 {
                return None;
            }
            let ratio = p.cycle.phase_elapsed_ms as f64 / total as f64;
            Some(ratio.clamp(0.0, 1.0))
        })
        .flatten()
    }

    /// Time since the cycle started, by device clock
    pub fn cycle_elapsed_ms(&self) -> Option<u64> {
        self.with_current(|p| {
            p.cycle
                .running
                .then(|| p.timestamp.saturating_sub(p.cycle.cycle_start_time))
        })
        .flatten()
    }

    /// Components of the current phase whose window covers the phase elapsed time
    pub fn active_components(&self) -> Vec<Component> {
        self.with_current(|p| {
            let elapsed = p.cycle.phase_elapsed_ms;
            current_phase_of(p)
                .map(|phase| {
                    phase
                        .components
                        .into_iter()
                        .filter(|c| c.is_active_at(elapsed))
                        .collect()
                })
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    /// RPM samples, oldest first
    pub fn rpm_history(&self) -> Vec<HistorySample> {
        self.read().rpm.to_vec()
    }

    /// Pressure samples, oldest first
    pub fn pressure_history(&self) -> Vec<HistorySample> {
        self.read().pressure.to_vec()
    }

    /// Drop both history buffers
    pub fn clear_history(&self) {
        let mut state = self.write();
        state.rpm.clear();
        state.pressure.clear();
    }

    /// Flip a digital output.
    ///
    /// The wiring is inverted, so a pin last reported at 1 (off) is sent 0 and
    /// anything else, including a pin never reported, is sent 1. Returns false
    /// without sending when the link is down. Two calls before fresh telemetry
    /// arrives both read the same stale level.
    pub fn toggle_pin(&self, pin: u32) -> bool {
        if !self.link.is_connected() {
            debug!("Not connected, cannot toggle pin {}", pin);
            return false;
        }
        let state = match self.pin_state(pin) {
            Some(1) => 0,
            _ => 1,
        };
        self.link.send(OutboundCommand::toggle_gpio(pin, state))
    }

    fn with_current<T>(&self, f: impl FnOnce(&TelemetryPacket) -> T) -> Option<T> {
        self.read().current.as_ref().map(f)
    }

    fn clone_state(&self) -> Arc<RwLock<ProjectionState>> {
        self.state.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, ProjectionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ProjectionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn current_phase_of(packet: &TelemetryPacket) -> Option<Phase> {
    let index = packet.cycle.current_phase_index as usize;
    let phases = packet.cycle_data.as_ref()?;
    index.checked_sub(1).and_then(|i| phases.get(i)).cloned()
}

fn fold_into(state: &RwLock<ProjectionState>, frame: &InboundFrame) {
    let packet = match frame.telemetry() {
        Some(packet) => packet,
        None => return,
    };

    let mut state = state.write().unwrap_or_else(PoisonError::into_inner);
    state.rpm.push(HistorySample {
        timestamp_ms: packet.timestamp,
        value: packet.sensors.rpm,
    });
    state.pressure.push(HistorySample {
        timestamp_ms: packet.timestamp,
        value: packet.sensors.pressure_freq,
    });
    state.current = Some(packet.clone());
    state.packets += 1;
    trace!("Folded telemetry packet at {}", packet.timestamp);
}

#[cfg(test)]
mod tests {
    use super::*;
    use devlink_session::{ConnectionState, Endpoint, LinkConfig, MemoryConnector};
    use serde_json::json;

    fn idle_link() -> DeviceLink {
        let mut config = LinkConfig::new(Endpoint::parse("ws://device.test/ws").unwrap());
        config.auto_connect = false;
        let (link, _driver) = DeviceLink::new(config, MemoryConnector::new());
        link
    }

    fn telemetry(value: serde_json::Value) -> InboundFrame {
        InboundFrame::Telemetry(serde_json::from_value(value).unwrap())
    }

    fn running_packet() -> InboundFrame {
        telemetry(json!({
            "timestamp": 61_000,
            "gpio": [{"pin": 4, "state": 1}, {"pin": 5, "state": 0}],
            "sensors": {"rpm": 820.0, "pressure_freq": 24_050.5, "sensor_error": false},
            "cycle": {
                "running": true,
                "current_phase_index": 2,
                "current_phase_name": "Wash",
                "total_phases": 3,
                "phase_elapsed_ms": 1500,
                "phase_total_duration_ms": 6000,
                "cycle_start_time": 1000
            },
            "cycle_data": [
                {"id": "p1", "name": "Fill", "components": []},
                {"id": "p2", "name": "Wash", "components": [
                    {"id": "c1", "label": "Motor", "compId": "m", "start": 0, "duration": 2000, "hasMotor": true},
                    {"id": "c2", "label": "Heater", "compId": "h", "start": 3000, "duration": 1000}
                ]},
                {"id": "p3", "name": "Drain", "components": []}
            ]
        }))
    }

    #[test]
    fn test_current_phase_is_one_based() {
        let projection = TelemetryProjection::attach(&idle_link(), 100);
        projection.fold(&running_packet());

        let phase = projection.current_phase().unwrap();
        assert_eq!(phase.id, "p2");
        assert_eq!(phase.name, "Wash");
        assert_eq!(projection.phase_name(), "Wash");
        assert!(projection.is_running());
    }

    #[test]
    fn test_idle_index_has_no_phase() {
        let projection = TelemetryProjection::attach(&idle_link(), 100);
        projection.fold(&telemetry(json!({
            "cycle": {"running": false, "current_phase_index": 0},
            "cycle_data": [{"id": "p1"}]
        })));
        assert!(projection.current_phase().is_none());
        assert!(projection.active_components().is_empty());
        assert_eq!(projection.cycle_elapsed_ms(), None);
    }

    #[test]
    fn test_derived_cycle_views() {
        let projection = TelemetryProjection::attach(&idle_link(), 100);
        projection.fold(&running_packet());

        assert_eq!(projection.phase_progress(), Some(0.25));
        assert_eq!(projection.cycle_elapsed_ms(), Some(60_000));
        let active: Vec<String> = projection
            .active_components()
            .into_iter()
            .map(|c| c.label)
            .collect();
        assert_eq!(active, vec!["Motor".to_string()]);
        assert_eq!(projection.pin_state(4), Some(1));
        assert_eq!(projection.pin_state(9), None);
        assert_eq!(projection.rpm(), 820.0);
        assert_eq!(projection.pressure(), 24_050.5);
    }

    #[test]
    fn test_packet_replaces_previous_wholesale() {
        let projection = TelemetryProjection::attach(&idle_link(), 100);
        projection.fold(&running_packet());
        projection.fold(&telemetry(json!({"timestamp": 62_000, "sensors": {"rpm": 10.0}})));

        assert_eq!(projection.rpm(), 10.0);
        assert_eq!(projection.pressure(), 0.0);
        assert!(projection.gpio().is_empty());
        assert!(!projection.is_running());
        assert_eq!(projection.phase_name(), "");
        assert_eq!(projection.packets(), 2);
    }

    #[test]
    fn test_history_is_capped() {
        let projection = TelemetryProjection::attach(&idle_link(), 3);
        for t in 1..=5u64 {
            projection.fold(&telemetry(json!({
                "timestamp": t * 1000,
                "sensors": {"rpm": t as f64, "pressure_freq": (t * 2) as f64}
            })));
        }

        let rpm = projection.rpm_history();
        assert_eq!(rpm.len(), 3);
        assert_eq!(rpm[0], HistorySample { timestamp_ms: 3000, value: 3.0 });
        assert_eq!(rpm[2], HistorySample { timestamp_ms: 5000, value: 5.0 });
        assert_eq!(projection.pressure_history()[2].value, 10.0);

        projection.clear_history();
        assert!(projection.rpm_history().is_empty());
        assert!(projection.pressure_history().is_empty());
        assert_eq!(projection.rpm(), 5.0);
    }

    #[test]
    fn test_unrecognized_frames_are_ignored() {
        let projection = TelemetryProjection::attach(&idle_link(), 100);
        projection.fold(&InboundFrame::Unrecognized(json!({"status": "ok"})));
        assert!(projection.current().is_none());
        assert!(projection.rpm_history().is_empty());
    }

    #[test]
    fn test_toggle_requires_connection() {
        let projection = TelemetryProjection::attach(&idle_link(), 100);
        projection.fold(&running_packet());
        assert!(!projection.toggle_pin(4));
    }

    #[test]
    fn test_detach_unregisters() {
        let link = idle_link();
        let projection = TelemetryProjection::attach(&link, 100);
        assert!(link.registry().contains(PROJECTION_KEY));
        assert!(projection.detach());
        assert!(!link.registry().contains(PROJECTION_KEY));
        assert!(!projection.detach());
    }

    async fn wait_until<F>(link: &DeviceLink, predicate: F)
    where
        F: FnMut(&ConnectionState) -> bool,
    {
        link.subscribe().wait_for(predicate).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_pin_inverts_last_level() {
        let connector = MemoryConnector::new();
        let config = LinkConfig::new(Endpoint::parse("ws://device.test/ws").unwrap());
        let (link, _driver) = DeviceLink::spawn(config, connector.clone());
        let projection = TelemetryProjection::attach(&link, 100);

        let mut peer = connector.accept().await.unwrap();
        wait_until(&link, |s| s.connected).await;
        assert_eq!(peer.recv_command().await.as_deref(), Some("connect"));

        peer.push_text(r#"{"timestamp":1,"gpio":[{"pin":4,"state":1},{"pin":5,"state":0}]}"#);
        wait_until(&link, |s| s.stats.frames_received == 1).await;
        assert_eq!(projection.packets(), 1);

        assert!(projection.toggle_pin(4));
        assert!(projection.toggle_pin(5));
        assert!(projection.toggle_pin(9));

        assert_eq!(
            peer.recv_command().await.as_deref(),
            Some(r#"{"action":"toggle_gpio","pin":4,"state":0}"#)
        );
        assert_eq!(
            peer.recv_command().await.as_deref(),
            Some(r#"{"action":"toggle_gpio","pin":5,"state":1}"#)
        );
        assert_eq!(
            peer.recv_command().await.as_deref(),
            Some(r#"{"action":"toggle_gpio","pin":9,"state":1}"#)
        );
    }
}
