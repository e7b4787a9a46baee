//! Motor axis physics.
//!
//! A simulated axis moves while exactly one of its direction outputs is
//! asserted. Speed scales with the PWM level when a PWM output is
//! configured. The reference switch is closed at position zero; travel
//! is clamped to `[0, max]` like a mechanical end stop.

use crate::config::{FeedbackKind, SimAxisConfig};
use fab_common::io::bus::IoValue;
use std::time::Duration;

/// Point updates produced by one physics step.
#[derive(Debug, Default)]
pub(crate) struct AxisOutputs {
    pub encoder: Option<(String, IoValue)>,
    pub ref_switch: Option<(String, IoValue)>,
}

/// Axis simulator.
pub(crate) struct AxisSim {
    config: SimAxisConfig,
    position: f64,
    /// Encoder zero in whole counts.
    zero: i64,
    /// Pulses counted since the last reset (counter feedback).
    pulses: i64,
    /// Whole-count position at the last step.
    last_count: i64,
}

impl AxisSim {
    pub fn new(config: SimAxisConfig) -> Self {
        let position = config.initial.clamp(0.0, config.max);
        let count = position.round() as i64;
        Self {
            config,
            position,
            zero: 0,
            pulses: 0,
            last_count: count,
        }
    }

    pub fn config(&self) -> &SimAxisConfig {
        &self.config
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    /// Current feedback value.
    pub fn feedback(&self) -> i64 {
        match self.config.feedback {
            FeedbackKind::Encoder => self.position.round() as i64 - self.zero,
            FeedbackKind::Counter => self.pulses,
        }
    }

    /// Clear the feedback counter.
    pub fn reset_feedback(&mut self) {
        self.zero = self.position.round() as i64;
        self.pulses = 0;
    }

    /// Advance by `dt` given the current output states.
    pub fn step(&mut self, increase: bool, decrease: bool, pwm_percent: i64, dt: Duration) -> AxisOutputs {
        let scale = (pwm_percent.clamp(0, 100) as f64) / 100.0;
        let travel = self.config.speed * scale * dt.as_secs_f64() * 1000.0;

        match (increase, decrease) {
            (true, false) => self.position += travel,
            (false, true) => self.position -= travel,
            _ => {}
        }
        self.position = self.position.clamp(0.0, self.config.max);

        let count = self.position.round() as i64;
        self.pulses += (count - self.last_count).abs();
        self.last_count = count;

        AxisOutputs {
            encoder: Some((self.config.encoder.clone(), IoValue::Int(self.feedback()))),
            ref_switch: self
                .config
                .ref_switch
                .as_ref()
                .map(|p| (p.clone(), IoValue::Bool(self.position <= 0.5))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(feedback: FeedbackKind) -> SimAxisConfig {
        SimAxisConfig {
            name: "AX".into(),
            increase: "AX_DOWN".into(),
            decrease: "AX_UP".into(),
            encoder: "AX_ENC".into(),
            feedback,
            ref_switch: Some("AX_REF".into()),
            pwm: None,
            speed: 1.0,
            max: 1000.0,
            initial: 100.0,
        }
    }

    #[test]
    fn encoder_follows_direction() {
        let mut axis = AxisSim::new(config(FeedbackKind::Encoder));
        axis.step(true, false, 100, Duration::from_millis(50));
        assert_eq!(axis.feedback(), 150);
        axis.step(false, true, 100, Duration::from_millis(20));
        assert_eq!(axis.feedback(), 130);
    }

    #[test]
    fn counter_counts_magnitude() {
        let mut axis = AxisSim::new(config(FeedbackKind::Counter));
        axis.step(true, false, 100, Duration::from_millis(10));
        axis.step(false, true, 100, Duration::from_millis(10));
        assert_eq!(axis.feedback(), 20);
        assert!((axis.position() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn pwm_scales_speed() {
        let mut axis = AxisSim::new(config(FeedbackKind::Encoder));
        axis.step(true, false, 20, Duration::from_millis(100));
        assert_eq!(axis.feedback(), 120);
    }

    #[test]
    fn ref_switch_closes_at_zero_and_travel_clamps() {
        let mut axis = AxisSim::new(config(FeedbackKind::Encoder));
        let out = axis.step(false, true, 100, Duration::from_millis(500));
        assert_eq!(axis.position(), 0.0);
        assert_eq!(out.ref_switch.unwrap().1, IoValue::Bool(true));
        axis.reset_feedback();
        assert_eq!(axis.feedback(), 0);
    }

    #[test]
    fn both_outputs_hold_position() {
        let mut axis = AxisSim::new(config(FeedbackKind::Encoder));
        axis.step(true, true, 100, Duration::from_millis(100));
        assert_eq!(axis.feedback(), 100);
    }
}
