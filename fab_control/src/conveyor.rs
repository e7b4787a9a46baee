//! Conveyor belt controller.

use crate::actuator::Actuator;
use crate::config::ConveyorConfig;
use crate::machine::{MachineController, MachineKind, Operation, Outcome};
use crate::sensor::Sensor;
use fab_common::error::{FactoryError, FactoryResult};
use fab_common::io::bus::IoBus;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::info;

/// A single-motor transport station.
#[derive(Debug)]
pub struct Conveyor {
    name: String,
    motor: Actuator,
    sensors: HashMap<String, Sensor>,
    position: AtomicU32,
}

impl Conveyor {
    pub fn new(name: impl Into<String>, motor: Actuator) -> Self {
        Self {
            name: name.into(),
            motor,
            sensors: HashMap::new(),
            position: AtomicU32::new(0),
        }
    }

    pub fn from_config(bus: &Arc<dyn IoBus>, name: impl Into<String>, config: &ConveyorConfig) -> Self {
        let mut motor = Actuator::new(Arc::clone(bus), config.motor.as_str());
        if let Some(pin) = &config.pwm {
            motor = motor.with_pwm(pin.as_str(), config.pwm_slow_percent);
        }
        let mut conveyor = Self::new(name, motor);
        for s in &config.sensors {
            conveyor.add_sensor(Sensor::new(Arc::clone(bus), s.name.as_str(), s.kind));
        }
        conveyor
    }

    pub fn add_sensor(&mut self, sensor: Sensor) {
        self.sensors.insert(sensor.name().to_string(), sensor);
    }

    pub fn motor(&self) -> &Actuator {
        &self.motor
    }

    fn sensor(&self, name: &str) -> FactoryResult<&Sensor> {
        self.sensors.get(name).ok_or_else(|| {
            FactoryError::Config(format!("conveyor {} has no sensor {name}", self.name))
        })
    }
}

impl MachineController for Conveyor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MachineKind {
        MachineKind::Conveyor
    }

    fn execute(&self, op: &Operation) -> FactoryResult<Outcome> {
        match op {
            Operation::RunToStopSensor {
                direction,
                sensor,
                stop_delay_ms,
                timeout_ms,
            } => {
                let sensor = self.sensor(sensor)?;
                self.motor.run_to_sensor(
                    *direction,
                    sensor,
                    Duration::from_millis(*stop_delay_ms),
                    Duration::from_millis(*timeout_ms),
                )?;
                info!("{}: product at {}", self.name, sensor.name());
            }
            Operation::RunForTime {
                direction,
                duration_ms,
                check_sensor,
            } => {
                let check = check_sensor.as_deref().map(|n| self.sensor(n)).transpose()?;
                self.motor
                    .run_for_time(*direction, Duration::from_millis(*duration_ms), check)?;
            }
            other => return Err(self.unsupported(other)),
        }
        self.position.fetch_add(1, Ordering::SeqCst);
        Ok(Outcome::Continue)
    }

    fn position(&self) -> u32 {
        self.position.load(Ordering::SeqCst)
    }
}
