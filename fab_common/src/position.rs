//! 3-axis robot positions.
//!
//! Each axis is either a concrete encoder target or "keep" (`None`). The
//! configuration files use the plant's historic `-1` sentinel for keep;
//! conversion happens here, at the serde boundary.

use crate::consts::AXIS_KEEP;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Robot axis selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisKind {
    Rotation,
    Horizontal,
    Vertical,
}

impl AxisKind {
    /// All axes in canonical order.
    pub const ALL: [AxisKind; 3] = [Self::Rotation, Self::Horizontal, Self::Vertical];
}

impl fmt::Display for AxisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rotation => write!(f, "rotation"),
            Self::Horizontal => write!(f, "horizontal"),
            Self::Vertical => write!(f, "vertical"),
        }
    }
}

/// Target pose of a 3-axis positioner.
///
/// Serialized as `[rotation, horizontal, vertical]` with `-1` for keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "[i64; 3]", into = "[i64; 3]")]
pub struct Position {
    pub rotation: Option<i64>,
    pub horizontal: Option<i64>,
    pub vertical: Option<i64>,
}

impl Position {
    /// Position that moves no axis.
    pub const KEEP: Self = Self {
        rotation: None,
        horizontal: None,
        vertical: None,
    };

    /// Home position (all axes at encoder zero).
    pub const HOME: Self = Self {
        rotation: Some(0),
        horizontal: Some(0),
        vertical: Some(0),
    };

    /// Position with all three axes set.
    pub const fn new(rotation: i64, horizontal: i64, vertical: i64) -> Self {
        Self {
            rotation: Some(rotation),
            horizontal: Some(horizontal),
            vertical: Some(vertical),
        }
    }

    /// Build from raw values using the `-1` keep sentinel.
    pub const fn from_raw(raw: [i64; 3]) -> Self {
        Self {
            rotation: axis_from_raw(raw[0]),
            horizontal: axis_from_raw(raw[1]),
            vertical: axis_from_raw(raw[2]),
        }
    }

    /// Raw values with `-1` for keep.
    pub const fn to_raw(self) -> [i64; 3] {
        [
            axis_to_raw(self.rotation),
            axis_to_raw(self.horizontal),
            axis_to_raw(self.vertical),
        ]
    }

    /// Target of one axis.
    pub const fn axis(&self, axis: AxisKind) -> Option<i64> {
        match axis {
            AxisKind::Rotation => self.rotation,
            AxisKind::Horizontal => self.horizontal,
            AxisKind::Vertical => self.vertical,
        }
    }

    /// Copy with one axis replaced.
    pub const fn with_axis(mut self, axis: AxisKind, value: Option<i64>) -> Self {
        match axis {
            AxisKind::Rotation => self.rotation = value,
            AxisKind::Horizontal => self.horizontal = value,
            AxisKind::Vertical => self.vertical = value,
        }
        self
    }

    /// Whether only the rotation axis is constrained.
    ///
    /// A pure rotation never needs the moving position.
    pub const fn is_pure_rotation(&self) -> bool {
        self.horizontal.is_none() && self.vertical.is_none()
    }

    /// Whether no axis is constrained.
    pub const fn is_keep(&self) -> bool {
        self.rotation.is_none() && self.horizontal.is_none() && self.vertical.is_none()
    }
}

const fn axis_from_raw(v: i64) -> Option<i64> {
    if v == AXIS_KEEP { None } else { Some(v) }
}

const fn axis_to_raw(v: Option<i64>) -> i64 {
    match v {
        Some(v) => v,
        None => AXIS_KEEP,
    }
}

impl From<[i64; 3]> for Position {
    fn from(raw: [i64; 3]) -> Self {
        Self::from_raw(raw)
    }
}

impl From<Position> for [i64; 3] {
    fn from(p: Position) -> Self {
        p.to_raw()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, h, v] = self.to_raw();
        write!(f, "(rot={r}, hor={h}, ver={v})")
    }
}
