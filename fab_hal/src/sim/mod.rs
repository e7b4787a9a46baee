//! Simulated plant.
//!
//! [`SimBus`] holds all plant state behind one lock. Time advances only
//! through [`SimBus::step`], normally called by a [`SimDriver`] thread.

mod axis;
mod bus;
mod driver;
mod io;

pub use self::bus::{SimBus, WriteRecord};
pub use self::driver::{DEFAULT_SIM_PERIOD, SimDriver};
