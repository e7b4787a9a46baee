//! Simulation configuration (`io.toml`).
//!
//! ```toml
//! [[points]]
//! name = "CB1_FWD"
//! type = "do"
//!
//! [[points]]
//! name = "CB1_END"
//! type = "di"
//! initial = true          # light barrier: beam intact
//!
//! [[reactions]]
//! output = "CB1_FWD"      # when CB1_FWD turns ON ...
//! trigger = true
//! delay_s = 3.0           # ... after 3 s ...
//! input = "CB1_END"       # ... CB1_END drops (product breaks the beam)
//! result = false
//!
//! [[axes]]
//! name = "GR1_ROT"
//! increase = "GR1_ROT_CCW"
//! decrease = "GR1_ROT_CW"
//! encoder = "GR1_ROT_ENC"
//! ref_switch = "GR1_ROT_REF"
//! speed = 2.0
//! max = 2000
//! ```

use fab_common::config::ConfigError;
use fab_common::io::point::IoPointType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// ─── Error Types ────────────────────────────────────────────────────

/// Simulation configuration validation error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SimConfigError {
    /// Two points share a name.
    #[error("duplicate point '{0}'")]
    PointDuplicate(String),

    /// A reaction or axis references an unconfigured point.
    #[error("{owner} references unknown point '{point}'")]
    UnknownPoint {
        /// Reaction or axis that holds the reference.
        owner: String,
        /// Missing point name.
        point: String,
    },

    /// A point has the wrong type for its use.
    #[error("{owner}: point '{point}' must be {expected}, found {actual}")]
    TypeMismatch {
        /// Reaction or axis that holds the reference.
        owner: String,
        /// Offending point name.
        point: String,
        /// Required type.
        expected: IoPointType,
        /// Configured type.
        actual: IoPointType,
    },

    /// Axis speed or travel is not positive.
    #[error("axis '{0}' needs positive speed and max travel")]
    AxisRangeInvalid(String),
}

impl From<SimConfigError> for ConfigError {
    fn from(e: SimConfigError) -> Self {
        ConfigError::ValidationError(e.to_string())
    }
}

// ─── Config Types ───────────────────────────────────────────────────

/// One simulated I/O point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointConfig {
    /// Point name used on the bus.
    pub name: String,
    /// Point type.
    #[serde(rename = "type")]
    pub io_type: IoPointType,
    /// Initial digital state (DI/DO).
    #[serde(default)]
    pub initial: bool,
    /// Initial integer value (counter/PWM).
    #[serde(default)]
    pub initial_value: i64,
}

/// Delayed input reaction to an output edge.
///
/// When `output` changes to `trigger`, after `delay_s` seconds `input`
/// is set to `result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionConfig {
    /// Output whose edge triggers the reaction.
    pub output: String,
    /// Output state that triggers this reaction.
    pub trigger: bool,
    /// Delay in seconds before the input changes.
    pub delay_s: f64,
    /// Input to change.
    pub input: String,
    /// New input state.
    pub result: bool,
}

/// Position feedback style of a simulated axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    /// Directional encoder: reads the position since the last reset.
    #[default]
    Encoder,
    /// Pulse counter: counts pulses in either direction.
    Counter,
}

/// Simulated motor axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimAxisConfig {
    /// Axis name (diagnostics only).
    pub name: String,
    /// Output that moves the axis toward larger positions.
    pub increase: String,
    /// Output that moves the axis toward zero.
    pub decrease: String,
    /// Counter point receiving the position feedback.
    pub encoder: String,
    /// Feedback style.
    #[serde(default)]
    pub feedback: FeedbackKind,
    /// Reference switch closed at position zero.
    #[serde(default)]
    pub ref_switch: Option<String>,
    /// Optional PWM output scaling the speed.
    #[serde(default)]
    pub pwm: Option<String>,
    /// Speed at 100 % PWM [counts per millisecond].
    pub speed: f64,
    /// Maximum travel [counts].
    pub max: f64,
    /// Start position [counts].
    #[serde(default)]
    pub initial: f64,
}

/// Complete `io.toml` content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimConfig {
    /// All I/O points.
    #[serde(default)]
    pub points: Vec<PointConfig>,
    /// Linked input reactions.
    #[serde(default)]
    pub reactions: Vec<ReactionConfig>,
    /// Motor axes.
    #[serde(default)]
    pub axes: Vec<SimAxisConfig>,
}

impl SimConfig {
    /// Parse and validate `io.toml` content.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate point references and types.
    pub fn validate(&self) -> Result<(), SimConfigError> {
        let mut types: HashMap<&str, IoPointType> = HashMap::new();
        for p in &self.points {
            if types.insert(p.name.as_str(), p.io_type).is_some() {
                return Err(SimConfigError::PointDuplicate(p.name.clone()));
            }
        }

        let check = |owner: &str, point: &str, allowed: &[IoPointType]| {
            match types.get(point) {
                None => Err(SimConfigError::UnknownPoint {
                    owner: owner.to_string(),
                    point: point.to_string(),
                }),
                Some(t) if !allowed.contains(t) => Err(SimConfigError::TypeMismatch {
                    owner: owner.to_string(),
                    point: point.to_string(),
                    expected: allowed[0],
                    actual: *t,
                }),
                Some(_) => Ok(()),
            }
        };

        for r in &self.reactions {
            let owner = format!("reaction {}→{}", r.output, r.input);
            check(&owner, &r.output, &[IoPointType::Do])?;
            check(&owner, &r.input, &[IoPointType::Di])?;
        }

        for a in &self.axes {
            let owner = format!("axis {}", a.name);
            check(&owner, &a.increase, &[IoPointType::Do])?;
            check(&owner, &a.decrease, &[IoPointType::Do])?;
            check(&owner, &a.encoder, &[IoPointType::Counter])?;
            if let Some(ref_switch) = &a.ref_switch {
                check(&owner, ref_switch, &[IoPointType::Di])?;
            }
            if let Some(pwm) = &a.pwm {
                check(&owner, pwm, &[IoPointType::Pwm])?;
            }
            if a.speed <= 0.0 || a.max <= 0.0 {
                return Err(SimConfigError::AxisRangeInvalid(a.name.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
[[points]]
name = "CB1_FWD"
type = "do"

[[points]]
name = "CB1_END"
type = "di"
initial = true

[[points]]
name = "ENC"
type = "counter"

[[points]]
name = "M_UP"
type = "do"

[[points]]
name = "M_DOWN"
type = "do"

[[reactions]]
output = "CB1_FWD"
trigger = true
delay_s = 0.5
input = "CB1_END"
result = false

[[axes]]
name = "M"
increase = "M_DOWN"
decrease = "M_UP"
encoder = "ENC"
feedback = "counter"
speed = 1.0
max = 500
"#;

    #[test]
    fn parse_valid_config() {
        let config = SimConfig::from_toml(VALID).unwrap();
        assert_eq!(config.points.len(), 5);
        assert_eq!(config.reactions[0].delay_s, 0.5);
        assert_eq!(config.axes[0].feedback, FeedbackKind::Counter);
        assert!(config.points[1].initial);
    }

    #[test]
    fn duplicate_point_rejected() {
        let mut config = SimConfig::from_toml(VALID).unwrap();
        config.points.push(config.points[0].clone());
        assert_eq!(
            config.validate(),
            Err(SimConfigError::PointDuplicate("CB1_FWD".into()))
        );
    }

    #[test]
    fn reaction_on_input_rejected() {
        let mut config = SimConfig::from_toml(VALID).unwrap();
        config.reactions[0].output = "CB1_END".into();
        assert!(matches!(
            config.validate(),
            Err(SimConfigError::TypeMismatch { expected: IoPointType::Do, .. })
        ));
    }

    #[test]
    fn axis_with_unknown_encoder_rejected() {
        let mut config = SimConfig::from_toml(VALID).unwrap();
        config.axes[0].encoder = "NOPE".into();
        assert!(matches!(
            config.validate(),
            Err(SimConfigError::UnknownPoint { .. })
        ));
    }
}
