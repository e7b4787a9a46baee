//! Plant configuration.
//!
//! A configuration directory holds three files:
//!
//! | file         | content                                            |
//! |--------------|----------------------------------------------------|
//! | `config.toml`| `[shared]` logging/service name, `[timing]`        |
//! | `io.toml`    | simulated I/O points, reactions and axes           |
//! | `plant.toml` | stations, machines and line step graphs            |
//!
//! ```toml
//! # plant.toml
//! counter_jump_policy = "absorb"
//!
//! [[stations]]
//! name = "CB1"
//!
//! [[stations]]
//! name = "VGR_TO_CB1"
//! group = "VGR"
//!
//! [machines.cb1]
//! kind = "conveyor"
//! station = "CB1"
//! motor = "CB1"
//! sensors = [{ name = "CB1_END", kind = "light_barrier" }]
//!
//! [[lines]]
//! name = "main"
//! start_at = "feed"
//! color = "RED"
//!
//! [[lines.steps]]
//! name = "feed"
//! machine = "cb1"
//! op = { kind = "run_to_stop_sensor", direction = "FWD", sensor = "CB1_END", timeout_ms = 10000 }
//! finish = true
//! ```

use crate::line::graph::LineGraph;
use crate::machine::{MachineKind, Operation};
use crate::sensor::CounterJumpPolicy;
use fab_common::config::{ConfigError, ConfigLoader, SharedConfig};
use fab_common::consts::{DEFAULT_LINE_TICK, DEFAULT_MOVE_THRESHOLD, DEFAULT_PWM_SLOW_PERCENT};
use fab_common::io::point::{Direction, SensorKind};
use fab_common::position::Position;
use fab_common::station::{LineId, StationId};
use fab_hal::SimConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

const fn default_timeout_ms() -> u64 {
    10_000
}

const fn default_pwm_slow() -> u8 {
    DEFAULT_PWM_SLOW_PERCENT
}

const fn default_move_threshold() -> i64 {
    DEFAULT_MOVE_THRESHOLD
}

const fn default_true() -> bool {
    true
}

// ─── config.toml ────────────────────────────────────────────────────

/// Loop timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Line poll loop tick [ms].
    #[serde(default = "TimingConfig::default_line_tick_ms")]
    pub line_tick_ms: u64,
    /// Simulation step period [ms].
    #[serde(default = "TimingConfig::default_sim_period_ms")]
    pub sim_period_ms: u64,
}

impl TimingConfig {
    const fn default_line_tick_ms() -> u64 {
        DEFAULT_LINE_TICK.as_millis() as u64
    }

    const fn default_sim_period_ms() -> u64 {
        1
    }

    pub fn line_tick(&self) -> Duration {
        Duration::from_millis(self.line_tick_ms)
    }

    pub fn sim_period(&self) -> Duration {
        Duration::from_millis(self.sim_period_ms)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            line_tick_ms: Self::default_line_tick_ms(),
            sim_period_ms: Self::default_sim_period_ms(),
        }
    }
}

/// `config.toml` content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub shared: SharedConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        if self.timing.line_tick_ms == 0 || self.timing.sim_period_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timing periods must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ─── Machines ───────────────────────────────────────────────────────

/// Named sensor attached to a machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    pub name: String,
    pub kind: SensorKind,
}

/// One encoder-driven axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Actuator name; outputs are `{actuator}_{DIRECTION}`.
    pub actuator: String,
    /// Position feedback point.
    pub encoder: String,
    /// `encoder` or `counter`.
    #[serde(default = "AxisConfig::default_encoder_kind")]
    pub encoder_kind: SensorKind,
    /// Reference switch closed at the home position.
    pub ref_switch: String,
    /// Drive direction toward the reference switch.
    pub home: Direction,
    #[serde(default)]
    pub pwm: Option<String>,
    #[serde(default = "default_pwm_slow")]
    pub pwm_slow_percent: u8,
    /// Distance below which a move is skipped.
    #[serde(default = "default_move_threshold")]
    pub move_threshold: i64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl AxisConfig {
    const fn default_encoder_kind() -> SensorKind {
        SensorKind::Encoder
    }

    fn validate(&self, owner: &str) -> Result<(), ConfigError> {
        if !self.encoder_kind.is_positional() {
            return Err(ConfigError::ValidationError(format!(
                "{owner}: axis {} needs an encoder or counter, found {}",
                self.actuator, self.encoder_kind
            )));
        }
        if self.pwm_slow_percent > 100 {
            return Err(ConfigError::ValidationError(format!(
                "{owner}: axis {} pwm_slow_percent {} > 100",
                self.actuator, self.pwm_slow_percent
            )));
        }
        Ok(())
    }
}

/// Conveyor belt (or any single-motor station).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConveyorConfig {
    pub station: StationId,
    pub motor: String,
    #[serde(default)]
    pub pwm: Option<String>,
    #[serde(default = "default_pwm_slow")]
    pub pwm_slow_percent: u8,
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

/// Robot end effector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GripperConfig {
    /// Motor-driven claw with a pulse counter and an open-position switch.
    Claw {
        actuator: String,
        counter: String,
        ref_switch: String,
        /// Counter value at which the claw holds a product.
        grip_value: i64,
        /// Counter value of the released claw.
        release_value: i64,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
    /// Vacuum suction cup.
    Vacuum {
        compressor: String,
        valve: String,
        #[serde(default)]
        grip_delay_ms: u64,
        #[serde(default)]
        release_delay_ms: u64,
    },
}

/// 3-axis positioner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotConfig {
    pub station: StationId,
    pub rotation: AxisConfig,
    pub horizontal: AxisConfig,
    pub vertical: AxisConfig,
    /// Safe intermediate pose, `-1` keeps an axis.
    pub moving_position: Position,
    pub gripper: GripperConfig,
    /// Check sensors used by `get_product`.
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

/// Cantilever (fork) of the warehouse crane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CantileverConfig {
    pub actuator: String,
    /// Switch closed when fully extended.
    pub front: String,
    /// Switch closed when fully retracted.
    pub back: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// High-bay warehouse crane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub station: StationId,
    pub horizontal: AxisConfig,
    pub vertical: AxisConfig,
    pub cantilever: CantileverConfig,
    /// Horizontal encoder value of each bay column.
    pub columns: [i64; 3],
    /// Vertical encoder value of each bay row.
    pub rows: [i64; 3],
    /// Horizontal/vertical encoder values of the hand-over conveyor.
    pub conveyor: [i64; 2],
    /// Vertical travel to lift a carrier off its rest.
    pub lift: i64,
    /// Inventory JSON, relative to the configuration directory.
    pub inventory: PathBuf,
}

/// Machine definition, tagged by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MachineConfig {
    Conveyor(ConveyorConfig),
    Robot(RobotConfig),
    Warehouse(WarehouseConfig),
}

impl MachineConfig {
    /// Home station of the machine.
    pub fn station(&self) -> &StationId {
        match self {
            Self::Conveyor(c) => &c.station,
            Self::Robot(c) => &c.station,
            Self::Warehouse(c) => &c.station,
        }
    }

    pub const fn kind(&self) -> MachineKind {
        match self {
            Self::Conveyor(_) => MachineKind::Conveyor,
            Self::Robot(_) => MachineKind::Robot,
            Self::Warehouse(_) => MachineKind::Warehouse,
        }
    }

    /// Names of the sensors an operation may refer to.
    pub fn sensor_names(&self) -> Vec<&str> {
        match self {
            Self::Conveyor(c) => c.sensors.iter().map(|s| s.name.as_str()).collect(),
            Self::Robot(c) => c.sensors.iter().map(|s| s.name.as_str()).collect(),
            Self::Warehouse(_) => Vec::new(),
        }
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        match self {
            Self::Conveyor(c) if c.pwm_slow_percent > 100 => Err(ConfigError::ValidationError(
                format!("machine {name}: pwm_slow_percent {} > 100", c.pwm_slow_percent),
            )),
            Self::Conveyor(_) => Ok(()),
            Self::Robot(c) => {
                c.rotation.validate(name)?;
                c.horizontal.validate(name)?;
                c.vertical.validate(name)
            }
            Self::Warehouse(c) => {
                c.horizontal.validate(name)?;
                c.vertical.validate(name)?;
                let lowest = c.rows.iter().chain([&c.conveyor[1]]).min().copied();
                if lowest.is_some_and(|v| v <= c.lift) {
                    return Err(ConfigError::ValidationError(format!(
                        "machine {name}: lift {} reaches above the home position",
                        c.lift
                    )));
                }
                Ok(())
            }
        }
    }
}

// ─── Stations ───────────────────────────────────────────────────────

/// A station and its optional sibling group.
///
/// Stations sharing a `group` are modes of one physical station and
/// change ownership together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    pub name: StationId,
    #[serde(default)]
    pub group: Option<String>,
}

// ─── Lines ──────────────────────────────────────────────────────────

/// Per-line feature flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineFlag {
    WithOven,
    WithSaw,
    WithPm,
    WithWh,
}

/// Feature flags of a line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineFlags {
    pub with_oven: bool,
    pub with_saw: bool,
    pub with_pm: bool,
    pub with_wh: bool,
}

impl LineFlags {
    pub const fn is_set(&self, flag: LineFlag) -> bool {
        match flag {
            LineFlag::WithOven => self.with_oven,
            LineFlag::WithSaw => self.with_saw,
            LineFlag::WithPm => self.with_pm,
            LineFlag::WithWh => self.with_wh,
        }
    }
}

/// Candidate successor of a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionConfig {
    pub step: String,
    /// Flags that must all be set.
    #[serde(default)]
    pub when: Vec<LineFlag>,
    /// Flags that must all be clear.
    #[serde(default)]
    pub unless: Vec<LineFlag>,
}

/// One step of a line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    /// Station claimed for the step; defaults to the machine's station.
    #[serde(default)]
    pub station: Option<StationId>,
    #[serde(default)]
    pub machine: Option<String>,
    #[serde(default)]
    pub op: Option<Operation>,
    /// The machine reaches End when the step completes.
    #[serde(default)]
    pub finish: bool,
    /// Advance without waiting for the operation.
    #[serde(default)]
    pub background: bool,
    /// The product is at the machine once the step completes.
    #[serde(default = "default_true")]
    pub moves_product: bool,
    /// Reserve the station without running anything.
    #[serde(default)]
    pub placeholder: bool,
    /// Successors, first match wins. No match ends the line.
    #[serde(default)]
    pub next: Vec<TransitionConfig>,
}

/// One production line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineConfig {
    pub name: LineId,
    /// First step.
    pub start_at: String,
    /// Last step; the line ends once it completes.
    #[serde(default)]
    pub end_at: Option<String>,
    #[serde(default)]
    pub with_oven: bool,
    #[serde(default)]
    pub with_saw: bool,
    #[serde(default)]
    pub with_pm: bool,
    #[serde(default)]
    pub with_wh: bool,
    /// Product colour used by warehouse operations without one.
    #[serde(default)]
    pub color: Option<String>,
    pub steps: Vec<StepConfig>,
}

impl LineConfig {
    pub fn flags(&self) -> LineFlags {
        LineFlags {
            with_oven: self.with_oven,
            with_saw: self.with_saw,
            with_pm: self.with_pm,
            with_wh: self.with_wh,
        }
    }
}

// ─── plant.toml ─────────────────────────────────────────────────────

/// `plant.toml` content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlantConfig {
    #[serde(default)]
    pub counter_jump_policy: CounterJumpPolicy,
    #[serde(default)]
    pub stations: Vec<StationConfig>,
    #[serde(default)]
    pub machines: BTreeMap<String, MachineConfig>,
    #[serde(default)]
    pub lines: Vec<LineConfig>,
}

impl PlantConfig {
    /// Parse and validate `plant.toml` content.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config = Self::parse(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn has_station(&self, id: &StationId) -> bool {
        self.stations.iter().any(|s| &s.name == id)
    }

    /// Check cross references and resolve every line graph once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for s in &self.stations {
            if !seen.insert(&s.name) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate station {}",
                    s.name
                )));
            }
        }

        for (name, machine) in &self.machines {
            if !self.has_station(machine.station()) {
                return Err(ConfigError::ValidationError(format!(
                    "machine {name} references unknown station {}",
                    machine.station()
                )));
            }
            machine.validate(name)?;
        }

        let mut lines = HashSet::new();
        for line in &self.lines {
            if !lines.insert(&line.name) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate line {}",
                    line.name
                )));
            }
            LineGraph::resolve(line, self)?;
        }
        Ok(())
    }
}

// ─── Config directory ───────────────────────────────────────────────

/// All configuration files of one plant.
#[derive(Debug, Clone)]
pub struct ConfigDir {
    pub root: PathBuf,
    pub app: AppConfig,
    pub io: SimConfig,
    pub plant: PlantConfig,
}

impl ConfigDir {
    /// Load and validate `config.toml`, `io.toml` and `plant.toml`.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let app = AppConfig::load(&root.join("config.toml"))?;
        app.validate()?;
        let io = SimConfig::load(&root.join("io.toml"))?;
        io.validate()?;
        let plant = PlantConfig::load(&root.join("plant.toml"))?;
        plant.validate()?;
        Ok(Self {
            root: root.to_path_buf(),
            app,
            io,
            plant,
        })
    }

    /// Resolve a path relative to the configuration directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}
