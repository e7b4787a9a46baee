//! Prelude module for common re-exports.
//!
//! ```rust
//! use fab_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::error::{FactoryError, FactoryResult, FaultClass};

// ─── I/O ────────────────────────────────────────────────────────────
pub use crate::io::bus::{CallbackId, Edge, EdgeCallback, EdgeWait, IoBus, IoError, IoValue};
pub use crate::io::point::{Direction, IoPointType, SensorKind};

// ─── Plant model ────────────────────────────────────────────────────
pub use crate::position::{AxisKind, Position};
pub use crate::station::{LineId, StationId, StationSnapshot, StationStatus};
