//! I/O point kinds, sensor kinds and actuator directions.
//!
//! Actuator outputs follow the **NameDirection** convention: the motor
//! `CB1` driven forward is the output point `CB1_FWD`. Directionless
//! actuators (valves, compressors) use the bare name.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

// ─── IoPointType ────────────────────────────────────────────────────

/// I/O point type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoPointType {
    /// Digital input.
    Di,
    /// Digital output.
    Do,
    /// Pulse counter / encoder input.
    Counter,
    /// PWM output, level in percent.
    Pwm,
}

impl IoPointType {
    /// Whether the kernel may write this point.
    pub const fn is_output(self) -> bool {
        matches!(self, Self::Do | Self::Pwm)
    }
}

impl fmt::Display for IoPointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Di => write!(f, "di"),
            Self::Do => write!(f, "do"),
            Self::Counter => write!(f, "counter"),
            Self::Pwm => write!(f, "pwm"),
        }
    }
}

impl FromStr for IoPointType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "di" => Ok(Self::Di),
            "do" => Ok(Self::Do),
            "counter" => Ok(Self::Counter),
            "pwm" => Ok(Self::Pwm),
            _ => Err(format!("unknown IoPointType: {s:?}")),
        }
    }
}

// ─── SensorKind ─────────────────────────────────────────────────────

/// Physical sensor type behind an input point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Light barrier. The input drops when the beam is broken.
    LightBarrier,
    /// Reference (limit) switch. The input rises when pressed.
    RefSwitch,
    /// Directional encoder.
    Encoder,
    /// Plain pulse counter: counts magnitude only.
    Counter,
}

impl SensorKind {
    /// Whether the sensor reports a position rather than a detection.
    pub const fn is_positional(self) -> bool {
        matches!(self, Self::Encoder | Self::Counter)
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LightBarrier => write!(f, "light_barrier"),
            Self::RefSwitch => write!(f, "ref_switch"),
            Self::Encoder => write!(f, "encoder"),
            Self::Counter => write!(f, "counter"),
        }
    }
}

// ─── Direction ──────────────────────────────────────────────────────

/// Actuator drive direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Fwd,
    Bwd,
    Cw,
    Ccw,
    Up,
    Down,
    Open,
    Close,
    /// Directionless output (valve, compressor, oven lamp).
    On,
}

impl Direction {
    /// Output point suffix, `None` for directionless outputs.
    pub const fn suffix(self) -> Option<&'static str> {
        match self {
            Self::Fwd => Some("FWD"),
            Self::Bwd => Some("BWD"),
            Self::Cw => Some("CW"),
            Self::Ccw => Some("CCW"),
            Self::Up => Some("UP"),
            Self::Down => Some("DOWN"),
            Self::Open => Some("OPEN"),
            Self::Close => Some("CLOSE"),
            Self::On => None,
        }
    }

    /// Opposite drive direction.
    pub const fn opposite(self) -> Self {
        match self {
            Self::Fwd => Self::Bwd,
            Self::Bwd => Self::Fwd,
            Self::Cw => Self::Ccw,
            Self::Ccw => Self::Cw,
            Self::Up => Self::Down,
            Self::Down => Self::Up,
            Self::Open => Self::Close,
            Self::Close => Self::Open,
            Self::On => Self::On,
        }
    }

    /// Output point name for actuator `name` driven in this direction.
    pub fn output_point(self, name: &str) -> String {
        match self.suffix() {
            Some(suffix) => format!("{name}_{suffix}"),
            None => name.to_string(),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.suffix().unwrap_or("ON"))
    }
}

impl FromStr for Direction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FWD" => Ok(Self::Fwd),
            "BWD" => Ok(Self::Bwd),
            "CW" => Ok(Self::Cw),
            "CCW" => Ok(Self::Ccw),
            "UP" => Ok(Self::Up),
            "DOWN" => Ok(Self::Down),
            "OPEN" => Ok(Self::Open),
            "CLOSE" => Ok(Self::Close),
            "ON" => Ok(Self::On),
            _ => Err(format!("unknown Direction: {s:?}")),
        }
    }
}
