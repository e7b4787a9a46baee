//! Robot end effectors.

use crate::actuator::Actuator;
use crate::config::GripperConfig;
use crate::sensor::{CounterJumpPolicy, Sensor};
use fab_common::error::FactoryResult;
use fab_common::io::bus::IoBus;
use fab_common::io::point::{Direction, SensorKind};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Grip/release capability of a robot.
pub trait Gripper: Send + Sync + fmt::Debug {
    /// Close on the product.
    fn grip(&self) -> FactoryResult<()>;

    /// Let go of the product.
    fn release(&self) -> FactoryResult<()>;

    /// Return to the open rest state.
    fn reset(&self) -> FactoryResult<()>;
}

/// Build the gripper described by `config`.
pub fn from_config(
    bus: &Arc<dyn IoBus>,
    config: &GripperConfig,
    jump_policy: CounterJumpPolicy,
) -> Box<dyn Gripper> {
    match config {
        GripperConfig::Claw {
            actuator,
            counter,
            ref_switch,
            grip_value,
            release_value,
            timeout_ms,
        } => Box::new(ClawGripper {
            actuator: Actuator::new(Arc::clone(bus), actuator.as_str()),
            counter: Sensor::new(Arc::clone(bus), counter.as_str(), SensorKind::Counter)
                .with_jump_policy(jump_policy),
            ref_switch: Sensor::new(Arc::clone(bus), ref_switch.as_str(), SensorKind::RefSwitch),
            grip_value: *grip_value,
            release_value: *release_value,
            timeout: Duration::from_millis(*timeout_ms),
        }),
        GripperConfig::Vacuum {
            compressor,
            valve,
            grip_delay_ms,
            release_delay_ms,
        } => Box::new(VacuumGripper {
            compressor: Actuator::new(Arc::clone(bus), compressor.as_str()),
            valve: Actuator::new(Arc::clone(bus), valve.as_str()),
            grip_delay: Duration::from_millis(*grip_delay_ms),
            release_delay: Duration::from_millis(*release_delay_ms),
        }),
    }
}

// ─── Claw ───────────────────────────────────────────────────────────

/// Motor-driven claw.
///
/// The claw motor only has a pulse counter, used as an encoder: closing
/// counts up from the open reference switch, opening is reconstructed by
/// the counter reconciliation of [`Sensor::wait_for_encoder`].
#[derive(Debug)]
pub struct ClawGripper {
    actuator: Actuator,
    counter: Sensor,
    ref_switch: Sensor,
    grip_value: i64,
    release_value: i64,
    timeout: Duration,
}

impl Gripper for ClawGripper {
    fn grip(&self) -> FactoryResult<()> {
        let value = self.actuator.run_to_encoder_value(
            Direction::Close,
            &self.counter,
            self.grip_value,
            self.timeout,
        )?;
        debug!("{}: closed at {}", self.actuator.name(), value);
        Ok(())
    }

    fn release(&self) -> FactoryResult<()> {
        let value = self.actuator.run_to_encoder_value(
            Direction::Open,
            &self.counter,
            self.release_value,
            self.timeout,
        )?;
        debug!("{}: opened to {}", self.actuator.name(), value);
        Ok(())
    }

    fn reset(&self) -> FactoryResult<()> {
        self.actuator.run_to_encoder_start(
            Direction::Open,
            &self.ref_switch,
            &self.counter,
            self.timeout,
        )
    }
}

// ─── Vacuum ─────────────────────────────────────────────────────────

/// Suction cup fed by a compressor through a valve.
#[derive(Debug)]
pub struct VacuumGripper {
    compressor: Actuator,
    valve: Actuator,
    grip_delay: Duration,
    release_delay: Duration,
}

impl Gripper for VacuumGripper {
    fn grip(&self) -> FactoryResult<()> {
        self.compressor.start(Direction::On)?;
        self.valve.start(Direction::On)?;
        thread::sleep(self.grip_delay);
        Ok(())
    }

    fn release(&self) -> FactoryResult<()> {
        self.valve.stop(Direction::On)?;
        self.compressor.stop(Direction::On)?;
        thread::sleep(self.release_delay);
        Ok(())
    }

    fn reset(&self) -> FactoryResult<()> {
        self.valve.stop(Direction::On)?;
        self.compressor.stop(Direction::On)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fab_common::io::bus::IoValue;
    use fab_hal::{SimBus, SimDriver};

    const IO: &str = r#"
[[points]]
name = "CLAW_OPEN"
type = "do"

[[points]]
name = "CLAW_CLOSE"
type = "do"

[[points]]
name = "CLAW_CNT"
type = "counter"

[[points]]
name = "CLAW_REF"
type = "di"

[[points]]
name = "COMP"
type = "do"

[[points]]
name = "VALVE"
type = "do"

[[axes]]
name = "CLAW"
increase = "CLAW_CLOSE"
decrease = "CLAW_OPEN"
encoder = "CLAW_CNT"
feedback = "counter"
ref_switch = "CLAW_REF"
speed = 0.1
max = 100.0
initial = 4.0
"#;

    #[test]
    fn claw_reset_grip_release() {
        let bus = Arc::new(SimBus::from_toml(IO).unwrap());
        let _driver = SimDriver::start(bus.clone(), Duration::from_millis(1));
        let dyn_bus: Arc<dyn IoBus> = bus.clone();
        let claw = from_config(
            &dyn_bus,
            &GripperConfig::Claw {
                actuator: "CLAW".into(),
                counter: "CLAW_CNT".into(),
                ref_switch: "CLAW_REF".into(),
                grip_value: 12,
                release_value: 4,
                timeout_ms: 3000,
            },
            CounterJumpPolicy::Absorb,
        );

        claw.reset().unwrap();
        assert!(bus.axis_position("CLAW").unwrap() < 1.0);

        claw.grip().unwrap();
        let closed = bus.axis_position("CLAW").unwrap();
        assert!(closed >= 11.0, "closed at {closed}");

        claw.release().unwrap();
        let opened = bus.axis_position("CLAW").unwrap();
        assert!(opened < closed, "opened at {opened}, closed at {closed}");
        assert_eq!(bus.read("CLAW_OPEN").unwrap(), IoValue::Bool(false));
        assert_eq!(bus.read("CLAW_CLOSE").unwrap(), IoValue::Bool(false));
    }

    #[test]
    fn vacuum_switches_compressor_and_valve() {
        let bus = Arc::new(SimBus::from_toml(IO).unwrap());
        let dyn_bus: Arc<dyn IoBus> = bus.clone();
        let vacuum = from_config(
            &dyn_bus,
            &GripperConfig::Vacuum {
                compressor: "COMP".into(),
                valve: "VALVE".into(),
                grip_delay_ms: 1,
                release_delay_ms: 1,
            },
            CounterJumpPolicy::Absorb,
        );

        vacuum.grip().unwrap();
        assert!(bus.read_bool("COMP").unwrap());
        assert!(bus.read_bool("VALVE").unwrap());

        vacuum.release().unwrap();
        assert!(!bus.read_bool("COMP").unwrap());
        assert!(!bus.read_bool("VALVE").unwrap());

        vacuum.grip().unwrap();
        vacuum.reset().unwrap();
        assert!(!bus.read_bool("VALVE").unwrap());
    }
}
