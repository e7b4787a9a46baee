//! Fab Common Library
//!
//! This crate provides the types shared by every crate of the fab
//! workspace: the I/O bus contract, station and position types, the
//! factory error taxonomy and the TOML configuration loader.
//!
//! # Module Structure
//!
//! - [`io`] - I/O bus trait, point values and point kinds
//! - [`station`] - Station/line identifiers and ownership status
//! - [`position`] - 3-axis robot positions with "keep axis" targets
//! - [`error`] - Factory error taxonomy and fault classes
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - Timing and threshold constants of the motion kernel
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use fab_common::prelude::*;
//! use fab_common::io::bus::IoValue;
//! ```

pub mod config;
pub mod consts;
pub mod error;
pub mod io;
pub mod position;
pub mod prelude;
pub mod station;
