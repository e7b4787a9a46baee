//! # Fab HAL Library
//!
//! Simulated plant I/O for development and testing without a PLC.
//!
//! The real PLC driver is an external collaborator; everything in the
//! control kernel talks to [`fab_common::io::bus::IoBus`]. This crate
//! provides [`SimBus`], an implementation that emulates:
//!
//! - named digital inputs/outputs, PWM outputs and counters
//! - linked reactions (an output edge changes an input after a delay)
//! - motor axes moving an encoder or a plain pulse counter while their
//!   direction outputs are asserted, with a reference switch at zero
//!
//! # Module Structure
//!
//! - [`config`] - `io.toml` simulation configuration and validation
//! - [`sim`] - `SimBus`, point table, axis physics and the stepping driver
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        fab_hal                             │
//! │  ┌──────────────┐   step(dt)   ┌──────────────────────┐    │
//! │  │  SimDriver   │─────────────►│  SimBus (IoBus impl) │    │
//! │  │  (thread)    │              │  points / axes /     │    │
//! │  └──────────────┘              │  reactions / waiters │    │
//! │                                └──────────▲───────────┘    │
//! │                                           │ read/write     │
//! │                                  fab_control kernel        │
//! └────────────────────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod sim;

pub use crate::config::{SimConfig, SimConfigError};
pub use crate::sim::{SimBus, SimDriver};
