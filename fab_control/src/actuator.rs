//! Output driver with composable bounded motion operations.
//!
//! Every operation that energizes an output holds a [`StopGuard`]: the
//! output is de-asserted (and the PWM level restored to 100 %) when the
//! operation returns, whether it succeeded, failed or timed out.

use crate::sensor::Sensor;
use fab_common::consts::{
    COUNTER_THRESHOLD, DEFAULT_PWM_SLOW_PERCENT, ENCODER_THRESHOLD, PWM_APPROACH_OFFSET,
    PWM_FULL_PERCENT, PWM_THRESHOLD, PWM_WINDOW,
};
use fab_common::error::{FactoryError, FactoryResult};
use fab_common::io::bus::{IoBus, IoValue};
use fab_common::io::point::{Direction, SensorKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A named output, optionally throttled by a PWM pin.
pub struct Actuator {
    name: String,
    bus: Arc<dyn IoBus>,
    pwm_pin: Option<String>,
    pwm_slow_percent: u8,
    pwm_level: AtomicU8,
}

impl Actuator {
    /// Create an actuator without PWM.
    pub fn new(bus: Arc<dyn IoBus>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bus,
            pwm_pin: None,
            pwm_slow_percent: DEFAULT_PWM_SLOW_PERCENT,
            pwm_level: AtomicU8::new(PWM_FULL_PERCENT),
        }
    }

    /// Attach a PWM pin and the slow speed used for final approaches.
    pub fn with_pwm(mut self, pin: impl Into<String>, slow_percent: u8) -> Self {
        self.pwm_pin = Some(pin.into());
        self.pwm_slow_percent = slow_percent.min(PWM_FULL_PERCENT);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_pwm(&self) -> bool {
        self.pwm_pin.is_some()
    }

    /// Speed applied on the next start [%].
    pub fn pwm_level(&self) -> u8 {
        self.pwm_level.load(Ordering::Acquire)
    }

    /// Output point driven for `direction`.
    pub fn output(&self, direction: Direction) -> String {
        direction.output_point(&self.name)
    }

    /// Whether the output for `direction` is asserted.
    pub fn is_running(&self, direction: Direction) -> FactoryResult<bool> {
        Ok(self.bus.read_bool(&self.output(direction))?)
    }

    // ─── Primitive outputs ──────────────────────────────────────────

    fn write_pwm(&self) -> FactoryResult<()> {
        if let Some(pin) = &self.pwm_pin {
            self.bus
                .write(pin, IoValue::Int(i64::from(self.pwm_level())))?;
        }
        Ok(())
    }

    /// Assert the output for `direction`.
    ///
    /// Already asserted outputs are left alone; only the PWM level is
    /// written again.
    pub fn start(&self, direction: Direction) -> FactoryResult<()> {
        let point = self.output(direction);
        self.write_pwm()?;
        if self.bus.read_bool(&point)? {
            debug!("{point} already running");
            return Ok(());
        }
        self.bus.write(&point, IoValue::Bool(true))?;
        info!("{} started {} at {}%", self.name, direction, self.pwm_level());
        Ok(())
    }

    /// De-assert the output for `direction` and the PWM pin.
    pub fn stop(&self, direction: Direction) -> FactoryResult<()> {
        let point = self.output(direction);
        self.bus.write(&point, IoValue::Bool(false))?;
        if let Some(pin) = &self.pwm_pin {
            self.bus.write(pin, IoValue::Int(0))?;
        }
        debug!("{} stopped {}", self.name, direction);
        Ok(())
    }

    /// Set the speed [%]. Takes effect immediately on a running output.
    pub fn set_pwm(&self, percent: u8) -> FactoryResult<()> {
        if percent > PWM_FULL_PERCENT {
            return Err(FactoryError::InvalidValue(format!(
                "{}: PWM {percent}% outside 0..=100",
                self.name
            )));
        }
        self.pwm_level.store(percent, Ordering::Release);
        Ok(())
    }

    // ─── Bounded operations ─────────────────────────────────────────

    /// Run until `stop_sensor` detects, then keep running for `stop_delay`.
    ///
    /// No-op if the sensor already detects.
    pub fn run_to_sensor(
        &self,
        direction: Direction,
        stop_sensor: &Sensor,
        stop_delay: Duration,
        timeout: Duration,
    ) -> FactoryResult<()> {
        if stop_sensor.is_detected()? {
            debug!("{}: {} already detects", self.name, stop_sensor.name());
            return Ok(());
        }
        let _guard = StopGuard::new(self, direction);
        self.start(direction)?;
        stop_sensor.wait_for_detect(timeout)?;
        if !stop_delay.is_zero() {
            thread::sleep(stop_delay);
        }
        Ok(())
    }

    /// Run for exactly `duration`.
    ///
    /// With a check sensor, fails with [`FactoryError::NoDetection`] if the
    /// sensor never detected during the run.
    pub fn run_for_time(
        &self,
        direction: Direction,
        duration: Duration,
        check_sensor: Option<&Sensor>,
    ) -> FactoryResult<()> {
        if let Some(sensor) = check_sensor {
            sensor.start_monitor()?;
        }
        let run = self.run_timed(direction, duration);
        let Some(sensor) = check_sensor else {
            return run;
        };
        sensor.remove_monitor();
        run?;
        if sensor.is_triggered() {
            Ok(())
        } else {
            Err(FactoryError::NoDetection {
                actuator: self.name.clone(),
                sensor: sensor.name().to_string(),
            })
        }
    }

    fn run_timed(&self, direction: Direction, duration: Duration) -> FactoryResult<()> {
        let _guard = StopGuard::new(self, direction);
        self.start(direction)?;
        thread::sleep(duration);
        Ok(())
    }

    /// Run until `encoder` reaches `target`.
    ///
    /// With a PWM pin, a far target is approached at full power up to
    /// [`PWM_APPROACH_OFFSET`] short of it, then finished at slow speed.
    /// Both phases share the single `timeout` deadline.
    pub fn run_to_encoder_value(
        &self,
        direction: Direction,
        encoder: &Sensor,
        target: i64,
        timeout: Duration,
    ) -> FactoryResult<i64> {
        let deadline = Instant::now() + timeout;
        let _guard = StopGuard::new(self, direction);

        if self.pwm_pin.is_none() {
            let threshold = match encoder.kind() {
                SensorKind::Counter => COUNTER_THRESHOLD,
                _ => ENCODER_THRESHOLD,
            };
            self.start(direction)?;
            return encoder.wait_for_encoder(target, threshold, remaining(deadline));
        }

        let current = encoder.current_value()?;
        if (current - target).abs() > PWM_WINDOW {
            let approach = if target > current {
                target - PWM_APPROACH_OFFSET
            } else {
                target + PWM_APPROACH_OFFSET
            };
            debug!(
                "{}: full power from {} to {} (target {})",
                self.name, current, approach, target
            );
            self.set_pwm(PWM_FULL_PERCENT)?;
            self.start(direction)?;
            encoder.wait_for_encoder(approach, ENCODER_THRESHOLD, remaining(deadline))?;
        }

        self.set_pwm(self.pwm_slow_percent)?;
        self.start(direction)?;
        encoder.wait_for_encoder(target, PWM_THRESHOLD, remaining(deadline))
    }

    /// Home to the reference switch and zero the encoder.
    pub fn run_to_encoder_start(
        &self,
        direction: Direction,
        ref_switch: &Sensor,
        encoder: &Sensor,
        timeout: Duration,
    ) -> FactoryResult<()> {
        self.run_to_sensor(direction, ref_switch, Duration::ZERO, timeout)?;
        encoder.reset_encoder()
    }

    /// Move one axis to `target` given its `current` value.
    ///
    /// | target                         | action                    |
    /// |--------------------------------|---------------------------|
    /// | `None`                         | axis kept                 |
    /// | `Some(0)`                      | homing                    |
    /// | closer than `move_threshold`   | none                      |
    /// | otherwise                      | `run_to_encoder_value`    |
    #[allow(clippy::too_many_arguments)]
    pub fn move_axis(
        &self,
        direction: Direction,
        target: Option<i64>,
        current: i64,
        move_threshold: i64,
        encoder: &Sensor,
        ref_switch: &Sensor,
        timeout: Duration,
    ) -> FactoryResult<()> {
        match target {
            None => Ok(()),
            Some(0) => self.run_to_encoder_start(direction, ref_switch, encoder, timeout),
            Some(t) if (current - t).abs() < move_threshold => {
                debug!("{}: {} already within {} of {}", self.name, current, move_threshold, t);
                Ok(())
            }
            Some(t) => self
                .run_to_encoder_value(direction, encoder, t, timeout)
                .map(|_| ()),
        }
    }
}

impl std::fmt::Debug for Actuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actuator")
            .field("name", &self.name)
            .field("pwm_pin", &self.pwm_pin)
            .field("pwm_level", &self.pwm_level())
            .finish()
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Stops an actuator when dropped.
struct StopGuard<'a> {
    actuator: &'a Actuator,
    direction: Direction,
}

impl<'a> StopGuard<'a> {
    fn new(actuator: &'a Actuator, direction: Direction) -> Self {
        Self {
            actuator,
            direction,
        }
    }
}

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        if self.actuator.has_pwm() {
            self.actuator.pwm_level.store(PWM_FULL_PERCENT, Ordering::Release);
        }
        if let Err(e) = self.actuator.stop(self.direction) {
            warn!("{}: stop {} failed: {e}", self.actuator.name, self.direction);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBus;
    use fab_common::io::bus::IoBus;
    use fab_hal::{SimBus, SimDriver};

    const CONVEYOR: &str = r#"
[[points]]
name = "CB_FWD"
type = "do"

[[points]]
name = "CB_BWD"
type = "do"

[[points]]
name = "CB_END"
type = "di"
initial = true

[[points]]
name = "CB_MID"
type = "di"
initial = true
"#;

    fn conveyor_bus() -> Arc<SimBus> {
        Arc::new(SimBus::from_toml(CONVEYOR).unwrap())
    }

    #[test]
    fn start_twice_asserts_once() {
        let bus = conveyor_bus();
        let motor = Actuator::new(bus.clone(), "CB");
        motor.start(Direction::Fwd).unwrap();
        motor.start(Direction::Fwd).unwrap();
        assert_eq!(bus.history("CB_FWD").len(), 1);
        assert!(motor.is_running(Direction::Fwd).unwrap());

        motor.stop(Direction::Fwd).unwrap();
        assert!(!motor.is_running(Direction::Fwd).unwrap());
    }

    #[test]
    fn start_reasserts_pwm_level_only() {
        let bus = Arc::new(
            ScriptedBus::new()
                .with_point("AX_UP", IoValue::Bool(false))
                .with_point("AX_PWM", IoValue::Int(0)),
        );
        let motor = Actuator::new(bus.clone(), "AX").with_pwm("AX_PWM", 20);
        motor.start(Direction::Up).unwrap();
        motor.set_pwm(40).unwrap();
        motor.start(Direction::Up).unwrap();

        let writes = bus.writes();
        let outputs = writes.iter().filter(|(p, _)| p == "AX_UP").count();
        let levels: Vec<IoValue> = writes
            .iter()
            .filter(|(p, _)| p == "AX_PWM")
            .map(|(_, v)| *v)
            .collect();
        assert_eq!(outputs, 1);
        assert_eq!(levels, vec![IoValue::Int(100), IoValue::Int(40)]);
    }

    #[test]
    fn set_pwm_rejects_out_of_range() {
        let motor = Actuator::new(conveyor_bus(), "CB");
        let err = motor.set_pwm(101).unwrap_err();
        assert!(matches!(err, FactoryError::InvalidValue(_)));
        assert!(!err.is_problem());
        motor.set_pwm(0).unwrap();
        assert_eq!(motor.pwm_level(), 0);
    }

    #[test]
    fn run_to_sensor_stops_after_timeout() {
        let bus = conveyor_bus();
        let motor = Actuator::new(bus.clone(), "CB");
        let end = Sensor::new(bus.clone(), "CB_END", SensorKind::LightBarrier);

        let err = motor
            .run_to_sensor(Direction::Fwd, &end, Duration::ZERO, Duration::from_millis(40))
            .unwrap_err();
        assert!(matches!(err, FactoryError::SensorTimeout { .. }));
        assert_eq!(bus.read("CB_FWD").unwrap(), IoValue::Bool(false));
        assert_eq!(bus.history("CB_FWD").len(), 2);
    }

    #[test]
    fn run_to_sensor_is_noop_when_detecting() {
        let bus = conveyor_bus();
        bus.inject("CB_END", IoValue::Bool(false)).unwrap();
        let motor = Actuator::new(bus.clone(), "CB");
        let end = Sensor::new(bus.clone(), "CB_END", SensorKind::LightBarrier);
        motor
            .run_to_sensor(Direction::Fwd, &end, Duration::ZERO, Duration::from_secs(1))
            .unwrap();
        assert!(bus.history("CB_FWD").is_empty());
    }

    #[test]
    fn run_for_time_reports_missing_detection() {
        let bus = conveyor_bus();
        let motor = Actuator::new(bus.clone(), "CB");
        let mid = Sensor::new(bus.clone(), "CB_MID", SensorKind::LightBarrier);

        let err = motor
            .run_for_time(Direction::Bwd, Duration::from_millis(30), Some(&mid))
            .unwrap_err();
        assert_eq!(
            err,
            FactoryError::NoDetection {
                actuator: "CB".into(),
                sensor: "CB_MID".into()
            }
        );
        assert!(!motor.is_running(Direction::Bwd).unwrap());
    }

    #[test]
    fn run_for_time_sees_detection_during_run() {
        let bus = conveyor_bus();
        let motor = Actuator::new(bus.clone(), "CB");
        let mid = Sensor::new(bus.clone(), "CB_MID", SensorKind::LightBarrier);

        let injector = Arc::clone(&bus);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            injector.inject("CB_MID", IoValue::Bool(false)).unwrap();
            thread::sleep(Duration::from_millis(10));
            injector.inject("CB_MID", IoValue::Bool(true)).unwrap();
        });
        motor
            .run_for_time(Direction::Fwd, Duration::from_millis(80), Some(&mid))
            .unwrap();
        handle.join().unwrap();
        assert!(!motor.is_running(Direction::Fwd).unwrap());
    }

    const AXIS: &str = r#"
[[points]]
name = "AX_UP"
type = "do"

[[points]]
name = "AX_DOWN"
type = "do"

[[points]]
name = "AX_PWM"
type = "pwm"

[[points]]
name = "AX_ENC"
type = "counter"

[[points]]
name = "AX_REF"
type = "di"

[[axes]]
name = "AX"
increase = "AX_DOWN"
decrease = "AX_UP"
encoder = "AX_ENC"
ref_switch = "AX_REF"
pwm = "AX_PWM"
speed = 2.0
max = 2000.0
initial = 0.0
"#;

    #[test]
    fn pwm_run_decelerates_and_restores_full_speed() {
        let bus = Arc::new(SimBus::from_toml(AXIS).unwrap());
        let _driver = SimDriver::start(bus.clone(), Duration::from_millis(1));
        let motor = Actuator::new(bus.clone(), "AX").with_pwm("AX_PWM", 20);
        let enc = Sensor::new(bus.clone(), "AX_ENC", SensorKind::Encoder);

        let value = motor
            .run_to_encoder_value(Direction::Down, &enc, 600, Duration::from_secs(5))
            .unwrap();
        assert!((value - 600).abs() <= PWM_THRESHOLD);

        let levels: Vec<i64> = bus
            .history("AX_PWM")
            .iter()
            .map(|w| w.value.as_int())
            .collect();
        assert!(levels.contains(&100));
        assert!(levels.contains(&20));
        assert_eq!(levels.last(), Some(&0));
        assert_eq!(motor.pwm_level(), PWM_FULL_PERCENT);
        assert_eq!(bus.read("AX_DOWN").unwrap(), IoValue::Bool(false));
    }

    #[test]
    fn encoder_run_timeout_still_stops() {
        let bus = Arc::new(SimBus::from_toml(AXIS).unwrap());
        // No driver: the axis never moves.
        let motor = Actuator::new(bus.clone(), "AX").with_pwm("AX_PWM", 20);
        let enc = Sensor::new(bus.clone(), "AX_ENC", SensorKind::Encoder);

        let err = motor
            .run_to_encoder_value(Direction::Down, &enc, 800, Duration::from_millis(60))
            .unwrap_err();
        assert!(matches!(err, FactoryError::SensorTimeout { .. }));
        assert_eq!(bus.read("AX_DOWN").unwrap(), IoValue::Bool(false));
        assert_eq!(bus.read("AX_PWM").unwrap(), IoValue::Int(0));
        assert_eq!(motor.pwm_level(), PWM_FULL_PERCENT);
    }

    #[test]
    fn move_axis_dispatch() {
        let bus = Arc::new(SimBus::from_toml(AXIS).unwrap());
        let _driver = SimDriver::start(bus.clone(), Duration::from_millis(1));
        let motor = Actuator::new(bus.clone(), "AX");
        let enc = Sensor::new(bus.clone(), "AX_ENC", SensorKind::Encoder);
        let home = Sensor::new(bus.clone(), "AX_REF", SensorKind::RefSwitch);
        let timeout = Duration::from_secs(5);

        // Keep and within-threshold targets issue no motion.
        motor
            .move_axis(Direction::Down, None, 0, 20, &enc, &home, timeout)
            .unwrap();
        motor
            .move_axis(Direction::Down, Some(10), 0, 20, &enc, &home, timeout)
            .unwrap();
        assert!(bus.history("AX_DOWN").is_empty());

        motor
            .move_axis(Direction::Down, Some(300), 0, 20, &enc, &home, timeout)
            .unwrap();
        assert!((enc.current_value().unwrap() - 300).abs() <= ENCODER_THRESHOLD + 5);

        let current = enc.current_value().unwrap();
        motor
            .move_axis(Direction::Up, Some(0), current, 20, &enc, &home, timeout)
            .unwrap();
        assert!(home.is_detected().unwrap());
        assert_eq!(enc.current_value().unwrap(), 0);
    }
}
