//! Encoder axis: one actuator with its encoder and reference switch.

use crate::actuator::Actuator;
use crate::config::AxisConfig;
use crate::sensor::{CounterJumpPolicy, Sensor};
use crate::task::MotionTask;
use fab_common::error::FactoryResult;
use fab_common::io::bus::IoBus;
use fab_common::io::point::{Direction, SensorKind};
use std::sync::Arc;
use std::time::Duration;

/// A positioned axis.
///
/// Encoder values grow away from the reference switch; `home` is the
/// drive direction toward it.
#[derive(Debug)]
pub struct Axis {
    label: String,
    actuator: Actuator,
    encoder: Sensor,
    ref_switch: Sensor,
    home: Direction,
    move_threshold: i64,
    timeout: Duration,
}

impl Axis {
    pub fn new(
        label: impl Into<String>,
        actuator: Actuator,
        encoder: Sensor,
        ref_switch: Sensor,
        home: Direction,
    ) -> Self {
        Self {
            label: label.into(),
            actuator,
            encoder,
            ref_switch,
            home,
            move_threshold: fab_common::consts::DEFAULT_MOVE_THRESHOLD,
            timeout: Duration::from_secs(10),
        }
    }

    /// Build from configuration.
    pub fn from_config(
        bus: &Arc<dyn IoBus>,
        label: impl Into<String>,
        config: &AxisConfig,
        jump_policy: CounterJumpPolicy,
    ) -> Self {
        let mut actuator = Actuator::new(Arc::clone(bus), config.actuator.as_str());
        if let Some(pin) = &config.pwm {
            actuator = actuator.with_pwm(pin.as_str(), config.pwm_slow_percent);
        }
        let encoder = Sensor::new(Arc::clone(bus), config.encoder.as_str(), config.encoder_kind)
            .with_jump_policy(jump_policy);
        let ref_switch = Sensor::new(
            Arc::clone(bus),
            config.ref_switch.as_str(),
            SensorKind::RefSwitch,
        );
        Self {
            label: label.into(),
            actuator,
            encoder,
            ref_switch,
            home: config.home,
            move_threshold: config.move_threshold,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    pub fn with_limits(mut self, move_threshold: i64, timeout: Duration) -> Self {
        self.move_threshold = move_threshold;
        self.timeout = timeout;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn actuator(&self) -> &Actuator {
        &self.actuator
    }

    /// Current encoder value.
    pub fn position(&self) -> FactoryResult<i64> {
        self.encoder.current_value()
    }

    /// Drive direction from `current` to `target`. Ties go home.
    pub fn direction_to(&self, target: i64, current: i64) -> Direction {
        if target > current {
            self.home.opposite()
        } else {
            self.home
        }
    }

    /// Move to `target`; `None` keeps the axis, `Some(0)` homes it.
    pub fn move_to(&self, target: Option<i64>) -> FactoryResult<()> {
        let Some(t) = target else {
            return Ok(());
        };
        let current = self.position()?;
        self.actuator.move_axis(
            self.direction_to(t, current),
            target,
            current,
            self.move_threshold,
            &self.encoder,
            &self.ref_switch,
            self.timeout,
        )
    }

    /// Home to the reference switch and zero the encoder.
    pub fn home(&self) -> FactoryResult<()> {
        self.actuator
            .run_to_encoder_start(self.home, &self.ref_switch, &self.encoder, self.timeout)
    }

    /// [`Axis::move_to`] on a background task.
    pub fn spawn_move(self: &Arc<Self>, target: Option<i64>) -> FactoryResult<MotionTask<()>> {
        let axis = Arc::clone(self);
        MotionTask::spawn(format!("{}-move", self.label), move || axis.move_to(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fab_hal::{SimBus, SimDriver};

    const IO: &str = r#"
[[points]]
name = "HOR_FWD"
type = "do"

[[points]]
name = "HOR_BWD"
type = "do"

[[points]]
name = "HOR_ENC"
type = "counter"

[[points]]
name = "HOR_REF"
type = "di"

[[axes]]
name = "HOR"
increase = "HOR_FWD"
decrease = "HOR_BWD"
encoder = "HOR_ENC"
ref_switch = "HOR_REF"
speed = 2.0
max = 2000.0
initial = 150.0
"#;

    fn axis(bus: &Arc<SimBus>) -> Axis {
        let bus: Arc<dyn IoBus> = bus.clone();
        let config: AxisConfig = toml::from_str(
            r#"
actuator = "HOR"
encoder = "HOR_ENC"
ref_switch = "HOR_REF"
home = "BWD"
timeout_ms = 5000
"#,
        )
        .unwrap();
        Axis::from_config(&bus, "hor", &config, CounterJumpPolicy::Absorb)
    }

    #[test]
    fn direction_ties_go_home() {
        let bus = Arc::new(SimBus::from_toml(IO).unwrap());
        let axis = axis(&bus);
        assert_eq!(axis.direction_to(500, 100), Direction::Fwd);
        assert_eq!(axis.direction_to(100, 500), Direction::Bwd);
        assert_eq!(axis.direction_to(100, 100), Direction::Bwd);
    }

    #[test]
    fn home_then_move_in_background() {
        let bus = Arc::new(SimBus::from_toml(IO).unwrap());
        let _driver = SimDriver::start(bus.clone(), Duration::from_millis(1));
        let axis = Arc::new(axis(&bus));

        axis.home().unwrap();
        assert_eq!(axis.position().unwrap(), 0);

        let task = axis.spawn_move(Some(400)).unwrap();
        task.join().unwrap();
        let pos = axis.position().unwrap();
        assert!((pos - 400).abs() <= 45, "pos = {pos}");
        assert!(!axis.actuator().is_running(Direction::Fwd).unwrap());

        // Keep target issues no write.
        let writes = bus.history("HOR_FWD").len();
        axis.move_to(None).unwrap();
        assert_eq!(bus.history("HOR_FWD").len(), writes);
    }
}
