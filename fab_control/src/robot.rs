//! 3-axis pick-and-place robot.
//!
//! ```text
//!            ┌──────────────── move_to_position ────────────────┐
//!  Idle ──► ToMovingPos ──► Moving ──► ToDestination ──► Idle
//!   │
//!   ├──► Init ──► Idle / End
//!   ├──► Gripping ──► GetProduct ──► Idle
//!   └──► Releasing ──► Idle
//!
//!  any failure ──► Problem (physical) / Error (defect)
//! ```
//!
//! Every pose is reached by moving the three axes concurrently, one
//! [`MotionTask`] per axis. Poses are ordered by [`planner::plan_moves`]
//! so the arm never rotates below its moving position.

pub mod gripper;
pub mod planner;

use crate::axis::Axis;
use crate::config::RobotConfig;
use crate::machine::{MachineController, MachineKind, Operation, Outcome};
use crate::sensor::{CounterJumpPolicy, Sensor};
use crate::task::{MotionTask, join_all};
use fab_common::consts::GET_PRODUCT_ATTEMPTS;
use fab_common::error::{FactoryError, FactoryResult, FaultClass};
use fab_common::io::bus::IoBus;
use fab_common::position::{AxisKind, Position};
use gripper::Gripper;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, error, info, warn};

/// Robot state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotState {
    Idle,
    Init,
    ToMovingPos,
    Moving,
    ToDestination,
    Gripping,
    Releasing,
    GetProduct,
    End,
    Problem,
    Error,
}

impl fmt::Display for RobotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Init => "INIT",
            Self::ToMovingPos => "TO_MOVING_POS",
            Self::Moving => "MOVING",
            Self::ToDestination => "TO_DESTINATION",
            Self::Gripping => "GRIPPING",
            Self::Releasing => "RELEASING",
            Self::GetProduct => "GET_PRODUCT",
            Self::End => "END",
            Self::Problem => "PROBLEM",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// 3-axis robot with a gripper.
#[derive(Debug)]
pub struct Robot3D {
    name: String,
    rotation: Arc<Axis>,
    horizontal: Arc<Axis>,
    vertical: Arc<Axis>,
    moving_position: Position,
    gripper: Box<dyn Gripper>,
    sensors: HashMap<String, Sensor>,
    state: Mutex<RobotState>,
    position: AtomicU32,
}

impl Robot3D {
    pub fn new(
        name: impl Into<String>,
        [rotation, horizontal, vertical]: [Axis; 3],
        moving_position: Position,
        gripper: Box<dyn Gripper>,
    ) -> Self {
        Self {
            name: name.into(),
            rotation: Arc::new(rotation),
            horizontal: Arc::new(horizontal),
            vertical: Arc::new(vertical),
            moving_position,
            gripper,
            sensors: HashMap::new(),
            state: Mutex::new(RobotState::Idle),
            position: AtomicU32::new(0),
        }
    }

    pub fn from_config(
        bus: &Arc<dyn IoBus>,
        name: impl Into<String>,
        config: &RobotConfig,
        jump_policy: CounterJumpPolicy,
    ) -> Self {
        let name = name.into();
        let axes = [
            Axis::from_config(bus, format!("{name}-rot"), &config.rotation, jump_policy),
            Axis::from_config(bus, format!("{name}-hor"), &config.horizontal, jump_policy),
            Axis::from_config(bus, format!("{name}-ver"), &config.vertical, jump_policy),
        ];
        let gripper = gripper::from_config(bus, &config.gripper, jump_policy);
        let mut robot = Self::new(name, axes, config.moving_position, gripper);
        for s in &config.sensors {
            robot.add_sensor(Sensor::new(Arc::clone(bus), s.name.as_str(), s.kind));
        }
        robot
    }

    /// Register a check sensor usable by `get_product`.
    pub fn add_sensor(&mut self, sensor: Sensor) {
        self.sensors.insert(sensor.name().to_string(), sensor);
    }

    pub fn state(&self) -> RobotState {
        *self.state.lock()
    }

    fn set_state(&self, state: RobotState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!("{}: {} -> {}", self.name, *current, state);
            *current = state;
        }
    }

    pub fn moving_position(&self) -> Position {
        self.moving_position
    }

    pub fn axis(&self, kind: AxisKind) -> &Arc<Axis> {
        match kind {
            AxisKind::Rotation => &self.rotation,
            AxisKind::Horizontal => &self.horizontal,
            AxisKind::Vertical => &self.vertical,
        }
    }

    /// Encoder values of all three axes.
    pub fn current_position(&self) -> FactoryResult<Position> {
        Ok(Position::new(
            self.rotation.position()?,
            self.horizontal.position()?,
            self.vertical.position()?,
        ))
    }

    fn sensor(&self, name: &str) -> FactoryResult<&Sensor> {
        self.sensors.get(name).ok_or_else(|| {
            FactoryError::Config(format!("robot {} has no sensor {name}", self.name))
        })
    }

    // ─── Motion ─────────────────────────────────────────────────────

    /// Move every constrained axis of `target` at once.
    ///
    /// All axis tasks are joined before the first failure is returned.
    pub fn move_all_axes(&self, target: Position) -> FactoryResult<()> {
        let mut tasks: Vec<MotionTask<()>> = Vec::with_capacity(3);
        for kind in AxisKind::ALL {
            let Some(value) = target.axis(kind) else {
                continue;
            };
            match self.axis(kind).spawn_move(Some(value)) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    // Already running axes are joined before reporting.
                    let _ = join_all(tasks);
                    return Err(e);
                }
            }
        }
        join_all(tasks).map(|_| ())
    }

    /// Move to `target` through the moving position.
    pub fn move_to_position(&self, target: Position, ignore_moving_position: bool) -> FactoryResult<()> {
        let current_vertical = self.vertical.position()?;
        let plan = planner::plan_moves(
            current_vertical,
            target,
            self.moving_position,
            ignore_moving_position,
        );
        info!("{}: move to {} in {} pose(s)", self.name, target, plan.len());

        let last = plan.len() - 1;
        for (i, pose) in plan.into_iter().enumerate() {
            let state = if i == last {
                RobotState::ToDestination
            } else if i == 0 {
                RobotState::ToMovingPos
            } else {
                RobotState::Moving
            };
            self.set_state(state);
            self.move_all_axes(pose)?;
        }
        Ok(())
    }

    /// Home all axes: vertical first, then rotation and horizontal together.
    pub fn init(&self, to_end: bool) -> FactoryResult<Outcome> {
        self.set_state(RobotState::Init);
        self.home_axes()?;
        self.gripper.reset()?;
        info!("{}: initialized", self.name);
        Ok(if to_end { Outcome::End } else { Outcome::Continue })
    }

    fn home_axes(&self) -> FactoryResult<()> {
        self.vertical.home()?;
        let rotation = self.rotation.spawn_move(Some(0))?;
        let horizontal = match self.horizontal.spawn_move(Some(0)) {
            Ok(task) => task,
            Err(e) => {
                let _ = rotation.join();
                return Err(e);
            }
        };
        join_all(vec![rotation, horizontal]).map(|_| ())
    }

    // ─── Handling ───────────────────────────────────────────────────

    /// Lower to `vertical`, grip and raise back, with retries.
    ///
    /// An attempt fails if `check_sensor` still detects the product after
    /// raising. After [`GET_PRODUCT_ATTEMPTS`] failures the robot is reset,
    /// returned to its starting pose and given one last attempt.
    pub fn get_product(&self, vertical: i64, check_sensor: Option<&str>) -> FactoryResult<()> {
        let check = check_sensor.map(|name| self.sensor(name)).transpose()?;
        let start = self.current_position()?;

        for attempt in 1..=GET_PRODUCT_ATTEMPTS {
            if self.grip_attempt(vertical, start.vertical, check)? {
                return Ok(());
            }
            warn!(
                "{}: grip attempt {}/{} failed, product still detected",
                self.name, attempt, GET_PRODUCT_ATTEMPTS
            );
            self.gripper.reset()?;
        }

        error!(
            "{}: product not gripped after {} attempts, resetting",
            self.name, GET_PRODUCT_ATTEMPTS
        );
        self.init(false)?;
        self.move_to_position(start, true)?;
        if self.grip_attempt(vertical, start.vertical, check)? {
            return Ok(());
        }
        Err(FactoryError::GetProduct {
            robot: self.name.clone(),
            attempts: GET_PRODUCT_ATTEMPTS + 1,
        })
    }

    fn grip_attempt(
        &self,
        vertical: i64,
        raise_to: Option<i64>,
        check: Option<&Sensor>,
    ) -> FactoryResult<bool> {
        self.set_state(RobotState::Gripping);
        self.vertical.move_to(Some(vertical))?;
        self.gripper.grip()?;
        self.set_state(RobotState::GetProduct);
        self.vertical.move_to(raise_to)?;
        match check {
            Some(sensor) => Ok(!sensor.is_detected()?),
            None => Ok(true),
        }
    }

    /// Lower to `vertical`, release and raise back.
    pub fn release_product(&self, vertical: i64) -> FactoryResult<()> {
        let start = self.vertical.position()?;
        self.set_state(RobotState::Releasing);
        self.vertical.move_to(Some(vertical))?;
        self.gripper.release()?;
        self.vertical.move_to(Some(start))
    }

    fn run(&self, op: &Operation) -> FactoryResult<Outcome> {
        match op {
            Operation::Init { to_end } => self.init(*to_end),
            Operation::MoveToPosition {
                position,
                ignore_moving_position,
            } => self
                .move_to_position(*position, *ignore_moving_position)
                .map(|()| Outcome::Continue),
            Operation::MoveAxis { axis, target } => {
                self.axis(*axis).move_to(Some(*target)).map(|()| Outcome::Continue)
            }
            Operation::GetProduct {
                vertical,
                check_sensor,
            } => self
                .get_product(*vertical, check_sensor.as_deref())
                .map(|()| Outcome::Continue),
            Operation::ReleaseProduct { vertical } => {
                self.release_product(*vertical).map(|()| Outcome::Continue)
            }
            other => Err(self.unsupported(other)),
        }
    }
}

impl MachineController for Robot3D {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MachineKind {
        MachineKind::Robot
    }

    fn execute(&self, op: &Operation) -> FactoryResult<Outcome> {
        match self.run(op) {
            Ok(Outcome::Continue) => {
                self.position.fetch_add(1, Ordering::SeqCst);
                self.set_state(RobotState::Idle);
                Ok(Outcome::Continue)
            }
            Ok(Outcome::End) => {
                self.set_state(RobotState::End);
                Ok(Outcome::End)
            }
            Err(e) => {
                error!("{}: {} failed: {}", self.name, op, e);
                self.set_state(match e.fault_class() {
                    FaultClass::Problem => RobotState::Problem,
                    FaultClass::Error => RobotState::Error,
                });
                Err(e)
            }
        }
    }

    fn position(&self) -> u32 {
        self.position.load(Ordering::SeqCst)
    }

    fn detail(&self) -> Option<String> {
        Some(self.state().to_string())
    }
}
