//! Station and line identifiers and the station ownership status.
//!
//! A station is the arbitration unit: one named physical station or
//! sub-station ("CB3", "GR2_CB1_TO_PM"). Lines own stations while they
//! use them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a physical station.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(pub String);

impl StationId {
    /// Create a station id.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Station name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Name of a production line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineId(pub String);

impl LineId {
    /// Create a line id.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Line name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LineId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Ownership status of a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StationStatus {
    /// Unowned, any line may claim it.
    #[default]
    Free,
    /// Owned and in use.
    Running,
    /// Owned but not usable (sibling in use, failed line holding it).
    Blocked,
    /// Owned by a line that is waiting on another station.
    Waiting,
    /// Owner escalated a physical fault.
    Problem,
    /// Owner escalated a defect.
    Error,
}

impl StationStatus {
    /// Whether this status excludes other lines.
    pub const fn is_held(self) -> bool {
        !matches!(self, Self::Free)
    }
}

impl fmt::Display for StationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Free => "FREE",
            Self::Running => "RUNNING",
            Self::Blocked => "BLOCKED",
            Self::Waiting => "WAITING",
            Self::Problem => "PROBLEM",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Read-only view of one station for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationSnapshot {
    /// Station name.
    pub id: StationId,
    /// Current status.
    pub status: StationStatus,
    /// Owning line, `None` iff `status == Free`.
    pub owner: Option<LineId>,
}
