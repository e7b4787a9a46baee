//! Machine controllers and the operation capability interface.
//!
//! Every physical station type implements [`MachineController`] and
//! executes the subset of [`Operation`]s it supports. A line never calls
//! a controller directly: it wraps it in a [`Machine`], which runs each
//! operation as a [`MotionTask`] and tracks the result.
//!
//! ```text
//! Idle ──dispatch──► Busy ──join Ok──► Idle / End
//!                     │
//!                     └──join Err──► Problem / Error ──clear_error──► Idle
//! ```

use crate::task::MotionTask;
use fab_common::error::{FactoryError, FactoryResult, FaultClass};
use fab_common::io::point::Direction;
use fab_common::position::{AxisKind, Position};
use fab_common::station::{LineId, StationId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

// ─── Operations ─────────────────────────────────────────────────────

/// A bounded physical operation, as written in a line step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    /// Conveyor: run until a stop sensor detects.
    RunToStopSensor {
        direction: Direction,
        sensor: String,
        #[serde(default)]
        stop_delay_ms: u64,
        timeout_ms: u64,
    },
    /// Conveyor: run for a fixed time, optionally checking a sensor.
    RunForTime {
        direction: Direction,
        duration_ms: u64,
        #[serde(default)]
        check_sensor: Option<String>,
    },
    /// Robot/warehouse: home all axes.
    Init {
        #[serde(default)]
        to_end: bool,
    },
    /// Robot: move through the moving position to a pose.
    MoveToPosition {
        position: Position,
        #[serde(default)]
        ignore_moving_position: bool,
    },
    /// Robot/warehouse: move a single axis.
    MoveAxis { axis: AxisKind, target: i64 },
    /// Robot: lower, grip and raise, with retries.
    GetProduct {
        vertical: i64,
        #[serde(default)]
        check_sensor: Option<String>,
    },
    /// Robot: lower, release and raise.
    ReleaseProduct { vertical: i64 },
    /// Warehouse: put the product from the conveyor into an empty bay.
    Store {
        #[serde(default)]
        color: Option<String>,
    },
    /// Warehouse: bring a product of this colour to the conveyor.
    Retrieve {
        #[serde(default)]
        color: Option<String>,
    },
    /// Warehouse: put an empty carrier from the conveyor into a bay.
    StoreCarrier,
    /// Warehouse: bring an empty carrier to the conveyor.
    RetrieveCarrier,
    /// Any machine: dwell.
    Wait { duration_ms: u64 },
}

impl Operation {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RunToStopSensor { .. } => "run_to_stop_sensor",
            Self::RunForTime { .. } => "run_for_time",
            Self::Init { .. } => "init",
            Self::MoveToPosition { .. } => "move_to_position",
            Self::MoveAxis { .. } => "move_axis",
            Self::GetProduct { .. } => "get_product",
            Self::ReleaseProduct { .. } => "release_product",
            Self::Store { .. } => "store",
            Self::Retrieve { .. } => "retrieve",
            Self::StoreCarrier => "store_carrier",
            Self::RetrieveCarrier => "retrieve_carrier",
            Self::Wait { .. } => "wait",
        }
    }

    /// Fill a missing product colour with the line colour.
    pub fn with_default_color(self, color: Option<&str>) -> Self {
        match self {
            Self::Store { color: None } => Self::Store {
                color: color.map(str::to_string),
            },
            Self::Retrieve { color: None } => Self::Retrieve {
                color: color.map(str::to_string),
            },
            other => other,
        }
    }

    /// Sensor names the operation refers to.
    pub fn sensor(&self) -> Option<&str> {
        match self {
            Self::RunToStopSensor { sensor, .. } => Some(sensor.as_str()),
            Self::RunForTime { check_sensor, .. } | Self::GetProduct { check_sensor, .. } => {
                check_sensor.as_deref()
            }
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How an operation left its machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Ready for the next operation.
    Continue,
    /// The machine is done for this line.
    End,
}

// ─── Controllers ────────────────────────────────────────────────────

/// Physical station type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineKind {
    Conveyor,
    Robot,
    Warehouse,
}

impl MachineKind {
    /// Whether this station type can execute `op`.
    pub const fn supports(self, op: &Operation) -> bool {
        use Operation as Op;
        match op {
            Op::Wait { .. } => true,
            Op::RunToStopSensor { .. } | Op::RunForTime { .. } => matches!(self, Self::Conveyor),
            Op::Init { .. } | Op::MoveAxis { .. } => {
                matches!(self, Self::Robot | Self::Warehouse)
            }
            Op::MoveToPosition { .. } | Op::GetProduct { .. } | Op::ReleaseProduct { .. } => {
                matches!(self, Self::Robot)
            }
            Op::Store { .. } | Op::Retrieve { .. } | Op::StoreCarrier | Op::RetrieveCarrier => {
                matches!(self, Self::Warehouse)
            }
        }
    }
}

impl fmt::Display for MachineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conveyor => write!(f, "conveyor"),
            Self::Robot => write!(f, "robot"),
            Self::Warehouse => write!(f, "warehouse"),
        }
    }
}

/// A station controller.
///
/// Methods take `&self`: operations run on a motion task thread while the
/// line thread reads the position and detail for snapshots.
pub trait MachineController: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> MachineKind;

    /// Run one operation to completion.
    fn execute(&self, op: &Operation) -> FactoryResult<Outcome>;

    /// Completed operation counter.
    fn position(&self) -> u32;

    /// Controller specific state, for status reporting.
    fn detail(&self) -> Option<String> {
        None
    }

    /// Error for an operation this controller does not offer.
    fn unsupported(&self, op: &Operation) -> FactoryError {
        FactoryError::Unsupported {
            machine: self.name().to_string(),
            operation: op.name().to_string(),
        }
    }
}

// ─── Machine ────────────────────────────────────────────────────────

/// Lifecycle state of a machine within its line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    Idle,
    Busy,
    End,
    Problem,
    Error,
}

impl MachineState {
    pub const fn fault(self) -> Option<FaultClass> {
        match self {
            Self::Problem => Some(FaultClass::Problem),
            Self::Error => Some(FaultClass::Error),
            _ => None,
        }
    }
}

/// Result of a finished operation.
#[derive(Debug)]
pub struct Completion {
    /// Step index the operation was dispatched for.
    pub step: usize,
    pub result: FactoryResult<Outcome>,
    /// When the operation returned.
    pub finished_at: Instant,
}

/// A controller owned by a line, with its in-flight operation.
pub struct Machine {
    name: String,
    controller: Arc<dyn MachineController>,
    state: MachineState,
    task: Option<(usize, MotionTask<(FactoryResult<Outcome>, Instant)>)>,
    last_step: Option<usize>,
    stations: Vec<StationId>,
    last_error: Option<FactoryError>,
}

impl Machine {
    pub fn new(controller: Arc<dyn MachineController>) -> Self {
        Self {
            name: controller.name().to_string(),
            controller,
            state: MachineState::Idle,
            task: None,
            last_step: None,
            stations: Vec::new(),
            last_error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MachineKind {
        self.controller.kind()
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn position(&self) -> u32 {
        self.controller.position()
    }

    pub fn last_step(&self) -> Option<usize> {
        self.last_step
    }

    pub fn last_error(&self) -> Option<&FactoryError> {
        self.last_error.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.task.is_some()
    }

    /// Stations claimed on behalf of this machine.
    pub fn stations(&self) -> &[StationId] {
        &self.stations
    }

    pub fn add_station(&mut self, station: &StationId) {
        if !self.stations.contains(station) {
            self.stations.push(station.clone());
        }
    }

    /// Start `op` for `step` on a background task.
    ///
    /// An operation still in flight is joined first. If it failed, or the
    /// machine is already faulted, that error is returned and nothing new
    /// starts.
    pub fn dispatch(&mut self, step: usize, op: Operation) -> FactoryResult<()> {
        if let Some(Completion { result: Err(e), .. }) = self.wait() {
            return Err(e);
        }
        if self.state.fault().is_some() {
            return Err(self.last_error.clone().unwrap_or_else(|| {
                FactoryError::InvalidValue(format!("{} is {:?}", self.name, self.state))
            }));
        }
        if !self.controller.kind().supports(&op) {
            return Err(self.controller.unsupported(&op));
        }

        info!("{}: {} (step {})", self.name, op, step);
        let controller = Arc::clone(&self.controller);
        let task = MotionTask::spawn(format!("{}-{}", self.name, op.name()), move || {
            let result = match op {
                Operation::Wait { duration_ms } => {
                    thread::sleep(Duration::from_millis(duration_ms));
                    Ok(Outcome::Continue)
                }
                op => controller.execute(&op),
            };
            Ok((result, Instant::now()))
        })?;
        self.task = Some((step, task));
        self.last_step = Some(step);
        self.state = MachineState::Busy;
        Ok(())
    }

    /// Join the operation if it has finished.
    pub fn poll(&mut self) -> Option<Completion> {
        let finished = self.task.as_ref().is_some_and(|(_, t)| t.is_finished());
        if finished { self.wait() } else { None }
    }

    /// Join the operation, blocking until it finishes.
    pub fn wait(&mut self) -> Option<Completion> {
        let (step, task) = self.task.take()?;
        let (result, finished_at) = match task.join() {
            Ok(done) => done,
            Err(panicked) => (Err(panicked), Instant::now()),
        };
        self.apply(step, result.clone());
        Some(Completion {
            step,
            result,
            finished_at,
        })
    }

    fn apply(&mut self, step: usize, result: FactoryResult<Outcome>) {
        match result {
            Ok(Outcome::Continue) => self.state = MachineState::Idle,
            Ok(Outcome::End) => self.state = MachineState::End,
            Err(e) => {
                self.state = match e.fault_class() {
                    FaultClass::Problem => MachineState::Problem,
                    FaultClass::Error => MachineState::Error,
                };
                self.last_error = Some(e);
            }
        }
        debug!("{}: step {} -> {:?}", self.name, step, self.state);
    }

    /// Mark the machine done for this line.
    pub fn mark_end(&mut self) {
        if self.state == MachineState::Idle {
            self.state = MachineState::End;
        }
    }

    /// Clear a Problem so the machine can run again.
    pub fn clear_error(&mut self) {
        if self.state.fault().is_some() {
            self.state = MachineState::Idle;
            self.last_error = None;
        }
    }

    /// Status view.
    pub fn snapshot(&self, line: &LineId) -> MachineSnapshot {
        MachineSnapshot {
            line: line.clone(),
            name: self.name.clone(),
            kind: self.kind(),
            state: self.state,
            position: self.position(),
            busy: self.is_busy(),
            detail: self.controller.detail(),
            last_error: self.last_error.as_ref().map(ToString::to_string),
        }
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("busy", &self.is_busy())
            .field("stations", &self.stations)
            .finish()
    }
}

/// Read-only view of one live machine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineSnapshot {
    pub line: LineId,
    pub name: String,
    pub kind: MachineKind,
    pub state: MachineState,
    pub position: u32,
    pub busy: bool,
    pub detail: Option<String>,
    pub last_error: Option<String>,
}
