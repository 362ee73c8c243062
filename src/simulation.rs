//! Simulated telemetry for the demo binary
//!
//! Drains the batteries, moves the altitude and fills the SD cards of
//! recording cameras, pushing through the [`MemoryTransport`] like a real
//! product would.

use crate::key::{domain, KeyId};
use crate::transport::{MemoryTransport, Transport};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Battery percent lost every `DRAIN_EVERY` ticks
const DRAIN_EVERY: u64 = 5;
/// MB written per tick while recording
const RECORDING_MB_PER_TICK: i64 = 120;

pub struct Telemetry {
    tick: u64,
    cameras: u32,
    batteries: u32,
}

impl Telemetry {
    pub fn new(cameras: u32, batteries: u32) -> Self {
        Self {
            tick: 0,
            cameras,
            batteries,
        }
    }

    /// Pushes for the next tick, computed from the current values
    pub fn step(&mut self, current: impl Fn(&KeyId) -> Option<Value>) -> Vec<(KeyId, Value)> {
        self.tick += 1;
        let mut pushes = Vec::new();

        let altitude = 50.0 + 10.0 * (self.tick as f64 / 10.0).sin();
        pushes.push((
            KeyId::new(domain::FLIGHT_CONTROLLER, "Altitude"),
            Value::from((altitude * 10.0).round() / 10.0),
        ));

        if self.tick % DRAIN_EVERY == 0 {
            for battery in 0..self.batteries {
                let charge_key = KeyId::indexed(domain::BATTERY, "ChargeRemaining", battery);
                let charge = current(&charge_key).and_then(|v| v.as_i64()).unwrap_or(100);
                if charge > 0 {
                    let charge = charge - 1;
                    let voltage = 13.0 + 2.4 * charge as f64 / 100.0;
                    pushes.push((charge_key, Value::from(charge)));
                    pushes.push((
                        KeyId::indexed(domain::BATTERY, "Voltage", battery),
                        Value::from((voltage * 100.0).round() / 100.0),
                    ));
                }
            }
        }

        for camera in 0..self.cameras {
            let recording = KeyId::indexed(domain::CAMERA, "IsRecording", camera);
            if current(&recording) != Some(Value::Bool(true)) {
                continue;
            }
            let remaining_key = KeyId::indexed(domain::CAMERA, "SDCardRemainingSpace", camera);
            let remaining = current(&remaining_key).and_then(|v| v.as_i64()).unwrap_or(0);
            let left = (remaining - RECORDING_MB_PER_TICK).max(0);
            if left != remaining {
                pushes.push((remaining_key, Value::from(left)));
            }
            if left == 0 {
                pushes.push((
                    KeyId::indexed(domain::CAMERA, "SDCardState", camera),
                    Value::from("Full"),
                ));
                pushes.push((recording, Value::Bool(false)));
            }
        }

        pushes
    }
}

/// Push telemetry every `interval` while the product is connected
pub fn spawn_telemetry(
    simulator: Arc<MemoryTransport>,
    interval: Duration,
    cameras: u32,
    batteries: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut telemetry = Telemetry::new(cameras, batteries);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        debug!(?interval, "Telemetry started");

        loop {
            ticker.tick().await;
            if !simulator.connection_status().is_connected() {
                continue;
            }
            let pushes = telemetry.step(|key| simulator.value(key));
            trace!(count = pushes.len(), "Telemetry tick");
            for (key, value) in pushes {
                simulator.push(&key, value);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_battery_drains_every_few_ticks() {
        let values: HashMap<KeyId, Value> =
            [(KeyId::indexed(domain::BATTERY, "ChargeRemaining", 0), json!(50))].into();
        let mut telemetry = Telemetry::new(0, 1);

        for _ in 1..DRAIN_EVERY {
            let pushes = telemetry.step(|key| values.get(key).cloned());
            assert_eq!(pushes.len(), 1, "only altitude between drains");
        }
        let pushes = telemetry.step(|key| values.get(key).cloned());
        assert!(pushes.contains(&(KeyId::indexed(domain::BATTERY, "ChargeRemaining", 0), json!(49))));
        assert!(pushes.contains(&(KeyId::indexed(domain::BATTERY, "Voltage", 0), json!(14.18))));
    }

    #[test]
    fn test_recording_fills_card() {
        let mut values: HashMap<KeyId, Value> = HashMap::new();
        values.insert(KeyId::indexed(domain::CAMERA, "IsRecording", 1), json!(true));
        values.insert(KeyId::indexed(domain::CAMERA, "SDCardRemainingSpace", 1), json!(100));
        let mut telemetry = Telemetry::new(2, 0);

        let pushes = telemetry.step(|key| values.get(key).cloned());
        assert!(pushes.contains(&(
            KeyId::indexed(domain::CAMERA, "SDCardRemainingSpace", 1),
            json!(0)
        )));
        assert!(pushes.contains(&(KeyId::indexed(domain::CAMERA, "SDCardState", 1), json!("Full"))));
        assert!(pushes.contains(&(KeyId::indexed(domain::CAMERA, "IsRecording", 1), json!(false))));
        assert!(!pushes
            .iter()
            .any(|(key, _)| key.index() == Some(0) && key.domain() == domain::CAMERA));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_task_pushes_while_connected() {
        let simulator = Arc::new(MemoryTransport::new("sim"));
        let altitude = KeyId::new(domain::FLIGHT_CONTROLLER, "Altitude");
        let task = spawn_telemetry(simulator.clone(), Duration::from_millis(100), 1, 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(simulator.value(&altitude).is_some());

        task.abort();
    }
}
