//! Factory error taxonomy.
//!
//! Every physical operation returns `Result<_, FactoryError>`. The line
//! layer only cares about the [`FaultClass`]: a `Problem` is an anticipated
//! physical fault the operator can resume from, an `Error` is a defect that
//! halts the line.

use crate::io::bus::IoError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Severity class of a failure as seen by the line state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultClass {
    /// Anticipated, physically recoverable fault.
    Problem,
    /// Unexpected fault, halts the line.
    Error,
}

/// Errors raised by the motion kernel.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FactoryError {
    /// No detection or trigger within the bound.
    #[error("Sensor {sensor} timed out after {timeout:?}")]
    SensorTimeout { sensor: String, timeout: Duration },

    /// Raw encoder value implausibly high at wait start.
    #[error("Encoder {sensor} overflow: raw value {raw} exceeds {limit}")]
    EncoderOverflow { sensor: String, raw: i64, limit: i64 },

    /// Pulse counter skipped values.
    #[error("Counter {sensor} jumped from {from} to {to}")]
    CounterJump { sensor: String, from: i64, to: i64 },

    /// Encoder did not read back zero after reset pulses.
    #[error("Encoder {sensor} did not reset after {attempts} attempts (last value {last})")]
    EncoderResetTimeout {
        sensor: String,
        attempts: u32,
        last: i64,
    },

    /// Timed run finished without the expected detection.
    #[error("No detection on {sensor} during run of {actuator}")]
    NoDetection { actuator: String, sensor: String },

    /// Pick retries exhausted, including the full-reset attempt.
    #[error("Robot {robot} failed to get product after {attempts} attempts")]
    GetProduct { robot: String, attempts: u32 },

    /// Out-of-range argument (PWM percentage, bay coordinate).
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// I/O bus failure (unknown point, driver fault).
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Operation not offered by this machine type.
    #[error("Machine {machine} does not support {operation}")]
    Unsupported { machine: String, operation: String },

    /// Station owned by another line.
    #[error("Station {station} is owned by {owner}")]
    StationBusy { station: String, owner: String },

    /// Lookup or configuration defect.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Inventory file could not be read or written.
    #[error("Inventory error: {0}")]
    Inventory(String),

    /// A background motion task panicked.
    #[error("Motion task {0} panicked")]
    TaskPanicked(String),

    /// The OS refused to start a motion task thread.
    #[error("Failed to spawn motion task {name}: {reason}")]
    Spawn { name: String, reason: String },
}

impl FactoryError {
    /// Fault class used for line escalation.
    pub const fn fault_class(&self) -> FaultClass {
        match self {
            Self::SensorTimeout { .. }
            | Self::EncoderOverflow { .. }
            | Self::CounterJump { .. }
            | Self::EncoderResetTimeout { .. }
            | Self::NoDetection { .. }
            | Self::GetProduct { .. } => FaultClass::Problem,

            Self::InvalidValue(_)
            | Self::Io(_)
            | Self::Unsupported { .. }
            | Self::StationBusy { .. }
            | Self::Config(_)
            | Self::Inventory(_)
            | Self::TaskPanicked(_)
            | Self::Spawn { .. } => FaultClass::Error,
        }
    }

    /// Shorthand for `fault_class() == FaultClass::Problem`.
    #[inline]
    pub const fn is_problem(&self) -> bool {
        matches!(self.fault_class(), FaultClass::Problem)
    }
}

/// Result alias used across the kernel.
pub type FactoryResult<T> = Result<T, FactoryError>;
