//! I/O bus contract.
//!
//! The bus is the only path from the kernel to the plant. Implementations
//! must be shareable across threads: one line loop and several motion
//! tasks read and write the same bus concurrently.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// ─── IoValue ────────────────────────────────────────────────────────

/// Value of a single I/O point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IoValue {
    /// Digital point state.
    Bool(bool),
    /// Counter value or PWM level.
    Int(i64),
}

impl IoValue {
    /// Boolean view. Integer points are true when non-zero.
    #[inline]
    pub const fn as_bool(self) -> bool {
        match self {
            Self::Bool(b) => b,
            Self::Int(v) => v != 0,
        }
    }

    /// Integer view. Digital points read as 0 or 1.
    #[inline]
    pub const fn as_int(self) -> i64 {
        match self {
            Self::Bool(b) => b as i64,
            Self::Int(v) => v,
        }
    }
}

impl Default for IoValue {
    fn default() -> Self {
        Self::Bool(false)
    }
}

impl fmt::Display for IoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(true) => write!(f, "ON"),
            Self::Bool(false) => write!(f, "OFF"),
            Self::Int(v) => write!(f, "{v}"),
        }
    }
}

// ─── Edges ──────────────────────────────────────────────────────────

/// Signal edge a waiter or callback reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    /// Low → high.
    Rising,
    /// High → low.
    Falling,
    /// Any change of value.
    Any,
}

impl Edge {
    /// Whether the transition `old → new` is this edge.
    pub fn matches(self, old: IoValue, new: IoValue) -> bool {
        match self {
            Self::Rising => !old.as_bool() && new.as_bool(),
            Self::Falling => old.as_bool() && !new.as_bool(),
            Self::Any => old != new,
        }
    }
}

/// Outcome of [`IoBus::wait_for_edge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeWait {
    /// The edge was observed before the timeout.
    Edge,
    /// No edge within the timeout.
    TimedOut,
}

/// Handle returned by [`IoBus::register_edge_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(pub u64);

/// Edge callback. Receives the point name and the new value.
///
/// Callbacks run on the thread that caused the edge and must not block.
pub type EdgeCallback = Box<dyn Fn(&str, IoValue) + Send + Sync>;

// ─── Errors ─────────────────────────────────────────────────────────

/// Error types for I/O bus operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IoError {
    /// No point with this name is configured.
    #[error("Unknown I/O point: {0}")]
    UnknownPoint(String),

    /// Write to an input point.
    #[error("I/O point {0} is not writable")]
    NotWritable(String),

    /// Counter operation on a non-counter point.
    #[error("I/O point {0} is not a counter")]
    NotACounter(String),

    /// Driver-level communication failure.
    #[error("I/O driver error: {0}")]
    Driver(String),
}

// ─── IoBus ──────────────────────────────────────────────────────────

/// Trait defining the interface to the plant I/O.
///
/// # Timing Contracts
///
/// | Operation | Blocking |
/// |-----------|----------|
/// | `read()` / `write()` | no |
/// | `wait_for_edge()` | parks the caller up to `timeout` |
/// | `reset_counter()` | no, the counter clears asynchronously |
pub trait IoBus: Send + Sync {
    /// Read the current value of a point.
    fn read(&self, point: &str) -> Result<IoValue, IoError>;

    /// Write an output point.
    fn write(&self, point: &str, value: IoValue) -> Result<(), IoError>;

    /// Park the caller until `edge` occurs on `point` or `timeout` elapses.
    fn wait_for_edge(&self, point: &str, edge: Edge, timeout: Duration)
    -> Result<EdgeWait, IoError>;

    /// Register a callback fired on every `edge` of `point`.
    fn register_edge_callback(
        &self,
        point: &str,
        edge: Edge,
        callback: EdgeCallback,
    ) -> Result<CallbackId, IoError>;

    /// Remove a callback. Unknown ids are ignored.
    fn remove_edge_callback(&self, id: CallbackId);

    /// Request a counter reset.
    fn reset_counter(&self, point: &str) -> Result<(), IoError>;

    /// Read a point as boolean.
    fn read_bool(&self, point: &str) -> Result<bool, IoError> {
        Ok(self.read(point)?.as_bool())
    }

    /// Read a point as integer.
    fn read_int(&self, point: &str) -> Result<i64, IoError> {
        Ok(self.read(point)?.as_int())
    }
}
