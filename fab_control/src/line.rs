//! Production lines.
//!
//! A line walks a [`graph::LineGraph`] of steps. Each step claims a
//! station in the shared registry and runs one operation on a machine.
//! [`runner::LineRunner`] is polled from the line's own thread.
//!
//! ```text
//! Idle ──► Running ◄──► Waiting
//!             │
//!             ├──► Finishing ──► End
//!             │
//!             └──► Problem ──resume──► Running
//!             └──► Error
//! ```

pub mod graph;
pub mod runner;

pub use self::graph::LineGraph;
pub use self::runner::{LineRunner, LineSnapshot};

use fab_common::error::FaultClass;
use fab_common::station::StationStatus;
use serde::Serialize;
use std::fmt;

/// Line state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStatus {
    Idle,
    Running,
    /// Blocked on a station owned by another line.
    Waiting,
    /// No step left; waiting for background operations.
    Finishing,
    End,
    Problem,
    Error,
}

impl LineStatus {
    /// The line no longer advances on its own.
    pub const fn is_stopped(self) -> bool {
        matches!(self, Self::End | Self::Problem | Self::Error)
    }

    pub const fn from_fault(class: FaultClass) -> Self {
        match class {
            FaultClass::Problem => Self::Problem,
            FaultClass::Error => Self::Error,
        }
    }

    /// Station status used for stations of a failed machine.
    pub const fn station_status(self) -> StationStatus {
        match self {
            Self::Problem => StationStatus::Problem,
            Self::Error => StationStatus::Error,
            Self::Waiting => StationStatus::Waiting,
            _ => StationStatus::Running,
        }
    }
}

impl fmt::Display for LineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Running => "RUNNING",
            Self::Waiting => "WAITING",
            Self::Finishing => "FINISHING",
            Self::End => "END",
            Self::Problem => "PROBLEM",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}
