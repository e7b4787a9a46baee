//! I/O abstraction shared by the simulation driver and the control kernel.
//!
//! Points are addressed by string name matching the physical plant
//! configuration. The kernel only ever talks to the [`bus::IoBus`] trait;
//! `fab_hal` provides the simulated implementation.

pub mod bus;
pub mod point;
