//! Read-only plant status.

use crate::line::LineSnapshot;
use crate::machine::MachineSnapshot;
use fab_common::station::StationSnapshot;
use serde::Serialize;

/// Stations, lines and live machines at one instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlantSnapshot {
    pub stations: Vec<StationSnapshot>,
    pub lines: Vec<LineSnapshot>,
    pub machines: Vec<MachineSnapshot>,
}

impl PlantSnapshot {
    /// Compact JSON for the status log.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }

    pub fn line(&self, name: &str) -> Option<&LineSnapshot> {
        self.lines.iter().find(|l| l.name.as_str() == name)
    }

    /// Stations held by some line.
    pub fn held(&self) -> impl Iterator<Item = &StationSnapshot> {
        self.stations.iter().filter(|s| s.status.is_held())
    }
}
