//! Plant supervisor: one polling thread per line.
//!
//! ```text
//!  line "white" ──tick──┐
//!  line "red"   ──tick──┼──► StationRegistry (single lock)
//!  line "blue"  ──tick──┘
//! ```
//!
//! Lines share nothing but the registry. A line thread keeps ticking
//! while its line is stopped on a physical fault so an operator can
//! resume it; it exits when the line ends or fails with a defect.

use crate::config::{ConfigDir, PlantConfig};
use crate::factory::{ControllerFactory, MachineFactory};
use crate::line::{LineGraph, LineRunner, LineStatus};
use crate::registry::StationRegistry;
use crate::snapshot::PlantSnapshot;
use fab_common::consts::DEFAULT_LINE_TICK;
use fab_common::error::{FactoryError, FactoryResult};
use fab_common::io::bus::IoBus;
use fab_common::station::LineId;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

type SharedLine = Arc<Mutex<LineRunner>>;

/// All lines of a plant over one station registry.
pub struct Plant {
    registry: Arc<StationRegistry>,
    lines: Vec<SharedLine>,
    running: Arc<AtomicBool>,
    tick: Duration,
    handles: Vec<JoinHandle<()>>,
}

impl Plant {
    /// Resolve every line of `plant`; controllers come from `factory`.
    pub fn new(
        plant: &PlantConfig,
        factory: Arc<dyn ControllerFactory>,
        tick: Duration,
    ) -> FactoryResult<Self> {
        let registry = Arc::new(StationRegistry::new(&plant.stations));
        let mut lines = Vec::with_capacity(plant.lines.len());
        for line in &plant.lines {
            let graph =
                LineGraph::resolve(line, plant).map_err(|e| FactoryError::Config(e.to_string()))?;
            let runner = LineRunner::new(graph, Arc::clone(&registry), Arc::clone(&factory));
            lines.push(Arc::new(Mutex::new(runner)));
        }
        info!(
            "plant: {} stations, {} machines, {} lines",
            plant.stations.len(),
            plant.machines.len(),
            lines.len()
        );
        Ok(Self {
            registry,
            lines,
            running: Arc::new(AtomicBool::new(false)),
            tick,
            handles: Vec::new(),
        })
    }

    /// Plant of a loaded configuration directory, driving `bus`.
    pub fn from_config_dir(dir: &ConfigDir, bus: Arc<dyn IoBus>) -> FactoryResult<Self> {
        let factory = MachineFactory::new(bus, &dir.plant, &dir.root);
        let tick = if dir.app.timing.line_tick_ms == 0 {
            DEFAULT_LINE_TICK
        } else {
            dir.app.timing.line_tick()
        };
        Self::new(&dir.plant, Arc::new(factory), tick)
    }

    pub fn registry(&self) -> &Arc<StationRegistry> {
        &self.registry
    }

    /// Cleared to stop every line thread.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Start one thread per line.
    pub fn start(&mut self) -> FactoryResult<()> {
        if !self.handles.is_empty() {
            return Err(FactoryError::InvalidValue("plant already started".into()));
        }
        self.running.store(true, Ordering::SeqCst);
        for line in &self.lines {
            let name = line.lock().name().clone();
            let line = Arc::clone(line);
            let running = Arc::clone(&self.running);
            let tick = self.tick;
            let handle = thread::Builder::new()
                .name(format!("line-{name}"))
                .spawn(move || run_line(&line, &running, tick))
                .map_err(|e| FactoryError::Spawn {
                    name: format!("line-{name}"),
                    reason: e.to_string(),
                })?;
            self.handles.push(handle);
        }
        Ok(())
    }

    /// Resume a line stopped on a physical fault.
    pub fn resume(&self, line: &LineId) -> FactoryResult<()> {
        let runner = self
            .lines
            .iter()
            .find(|l| l.lock().name() == line)
            .ok_or_else(|| FactoryError::Config(format!("unknown line {line}")))?;
        runner.lock().resume()
    }

    pub fn line_status(&self, line: &LineId) -> Option<LineStatus> {
        self.lines.iter().find_map(|l| {
            let l = l.lock();
            (l.name() == line).then(|| l.status())
        })
    }

    /// Every line ended or failed.
    pub fn is_finished(&self) -> bool {
        self.lines.iter().all(|l| l.lock().status().is_stopped())
    }

    pub fn snapshot(&self) -> PlantSnapshot {
        let mut snapshot = PlantSnapshot {
            stations: self.registry.snapshot(),
            ..PlantSnapshot::default()
        };
        for line in &self.lines {
            let line = line.lock();
            snapshot.lines.push(line.snapshot());
            snapshot.machines.extend(line.machine_snapshots());
        }
        snapshot
    }

    /// Stop the line threads, join in-flight operations and free every
    /// station.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("a line thread panicked");
            }
        }
        for line in &self.lines {
            line.lock().shutdown();
        }
        info!("plant stopped");
    }
}

impl Drop for Plant {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.shutdown();
        }
    }
}

fn run_line(line: &Mutex<LineRunner>, running: &AtomicBool, tick: Duration) {
    while running.load(Ordering::SeqCst) {
        let status = line.lock().tick();
        if matches!(status, LineStatus::End | LineStatus::Error) {
            debug!("line thread exits: {status}");
            break;
        }
        thread::sleep(tick);
    }
}

impl std::fmt::Debug for Plant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plant")
            .field("lines", &self.lines.len())
            .field("tick", &self.tick)
            .field("started", &!self.handles.is_empty())
            .finish()
    }
}
