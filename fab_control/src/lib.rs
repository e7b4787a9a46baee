//! # Fab Control Library
//!
//! Motion, detection and station arbitration kernel for PLC-driven
//! factory lines. Every physical operation runs as a bounded background
//! task over an [`fab_common::io::bus::IoBus`]; lines share stations
//! through one [`registry::StationRegistry`].
//!
//! ## Layers
//!
//! 1. **Sensor / Actuator**: edge waits, encoder reconciliation, bounded
//!    motor runs with guaranteed stop
//! 2. **Axis / MotionTask**: homing and positioning, joinable tasks
//! 3. **Machines**: [`conveyor::Conveyor`], [`robot::Robot3D`],
//!    [`warehouse::Warehouse`] behind [`machine::MachineController`]
//! 4. **Lines**: [`line::LineRunner`] walking a step graph, claiming
//!    stations before building controllers
//! 5. **Plant**: [`plant::Plant`], one polling thread per line
//!
//! ```text
//! Plant ─┬─ LineRunner ─┬─ Machine ─ MotionTask ─ Conveyor/Robot3D/Warehouse
//!        │              │                              │
//!        └─ StationRegistry ◄─── claim ───┘            └─ Axis/Actuator/Sensor ─► IoBus
//! ```

pub mod actuator;
pub mod axis;
pub mod config;
pub mod conveyor;
pub mod factory;
pub mod inventory;
pub mod line;
pub mod machine;
pub mod plant;
pub mod registry;
pub mod robot;
pub mod sensor;
pub mod snapshot;
pub mod task;
pub mod warehouse;

#[cfg(test)]
mod testing;
