//! Line state machine.
//!
//! One tick, in order:
//!
//! 1. join finished operations and apply their results;
//! 2. the machine that failed first escalates the line, which stops here;
//! 3. finished machines not holding the product give up their stations;
//! 4. a pending station request is retried;
//! 5. a finishing line ends once no operation is in flight;
//! 6. a completed step advances along the step graph.

use super::LineStatus;
use super::graph::{LineGraph, Step};
use crate::factory::ControllerFactory;
use crate::machine::{Completion, Machine, MachineSnapshot, MachineState};
use crate::registry::{ClaimResult, StationRegistry};
use fab_common::error::{FactoryError, FactoryResult};
use fab_common::station::{LineId, StationId, StationStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Step(usize),
    End,
}

/// Read-only view of a line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineSnapshot {
    pub name: LineId,
    pub status: LineStatus,
    pub step: Option<String>,
    pub waiting_for: Option<String>,
    /// Machine currently holding the product.
    pub product_at: Option<String>,
    pub error: Option<String>,
}

/// Runs one line over the shared station registry.
pub struct LineRunner {
    graph: LineGraph,
    registry: Arc<StationRegistry>,
    factory: Arc<dyn ControllerFactory>,
    status: LineStatus,
    current: Option<usize>,
    step_done: bool,
    waiting_for: Option<Target>,
    machines: BTreeMap<String, Machine>,
    /// Failed machines, in the order their operations returned.
    failures: Vec<String>,
    product_at: Option<String>,
    error: Option<FactoryError>,
    /// Status to return to on resume.
    stopped_from: LineStatus,
}

impl LineRunner {
    pub fn new(
        graph: LineGraph,
        registry: Arc<StationRegistry>,
        factory: Arc<dyn ControllerFactory>,
    ) -> Self {
        Self {
            graph,
            registry,
            factory,
            status: LineStatus::Idle,
            current: None,
            step_done: false,
            waiting_for: None,
            machines: BTreeMap::new(),
            failures: Vec::new(),
            product_at: None,
            error: None,
            stopped_from: LineStatus::Idle,
        }
    }

    pub fn name(&self) -> &LineId {
        self.graph.name()
    }

    pub fn status(&self) -> LineStatus {
        self.status
    }

    pub fn graph(&self) -> &LineGraph {
        &self.graph
    }

    /// Name of the step the line is at.
    pub fn current_step(&self) -> Option<&str> {
        self.current.map(|i| self.graph.step(i).name.as_str())
    }

    pub fn machine(&self, name: &str) -> Option<&Machine> {
        self.machines.get(name)
    }

    pub fn product_at(&self) -> Option<&str> {
        self.product_at.as_deref()
    }

    pub fn last_error(&self) -> Option<&FactoryError> {
        self.error.as_ref()
    }

    // ─── Tick ───────────────────────────────────────────────────────

    /// Advance the line by one poll cycle.
    pub fn tick(&mut self) -> LineStatus {
        match self.status {
            LineStatus::Idle => {
                info!("{}: starting", self.name());
                self.switch_state(Target::Step(self.graph.start()));
                return self.status;
            }
            LineStatus::End => return self.status,
            _ => {}
        }

        self.poll_machines();
        if self.status.is_stopped() {
            return self.status;
        }

        if let Some(name) = self.first_failure() {
            let error = self.machines.get(&name).and_then(|m| m.last_error().cloned());
            let error = error.unwrap_or_else(|| {
                FactoryError::Config(format!("machine {name} failed without an error"))
            });
            self.fail(Some(&name), error);
            return self.status;
        }

        self.release_finished_machines();

        if let Some(target) = self.waiting_for {
            self.switch_state(target);
            return self.status;
        }

        if self.status == LineStatus::Finishing {
            if self.machines.values().all(|m| !m.is_busy()) {
                self.finish();
            }
            return self.status;
        }

        if self.step_done {
            let target = self.next_target();
            self.switch_state(target);
        }
        self.status
    }

    fn poll_machines(&mut self) {
        let mut completions: Vec<(String, Completion)> = self
            .machines
            .iter_mut()
            .filter_map(|(name, m)| m.poll().map(|c| (name.clone(), c)))
            .collect();
        completions.sort_by_key(|(_, c)| c.finished_at);
        for (name, completion) in completions {
            self.on_completion(&name, completion);
        }
    }

    fn on_completion(&mut self, name: &str, completion: Completion) {
        if completion.result.is_err() {
            if !self.failures.iter().any(|n| n == name) {
                self.failures.push(name.to_string());
            }
            return;
        }
        let step = self.graph.step(completion.step);
        if step.finish {
            if let Some(m) = self.machines.get_mut(name) {
                m.mark_end();
            }
        }
        if step.moves_product {
            self.product_at = Some(name.to_string());
        }
        if self.current == Some(completion.step) && !step.background {
            self.step_done = true;
        }
        debug!("{}: step {} done on {name}", self.graph.name(), step.name);
    }

    fn first_failure(&self) -> Option<String> {
        self.failures
            .iter()
            .find(|name| {
                self.machines
                    .get(name.as_str())
                    .is_some_and(|m| m.state().fault().is_some())
            })
            .cloned()
    }

    /// Stop the line: release what can be released, mark the failed
    /// machine's stations.
    fn fail(&mut self, machine: Option<&str>, error: FactoryError) {
        let status = LineStatus::from_fault(error.fault_class());
        let line = self.graph.name().clone();

        let failed: Vec<StationId> = machine
            .and_then(|n| self.machines.get(n))
            .map(|m| m.stations().to_vec())
            .unwrap_or_default();
        let mut keep = failed.clone();
        for m in self.machines.values().filter(|m| m.is_busy()) {
            keep.extend(m.stations().iter().cloned());
        }
        self.registry.release_line(&line, &keep);
        for station in &failed {
            if let Err(e) = self
                .registry
                .switch_status(station, status.station_status(), &line)
            {
                warn!("{line}: cannot mark {station}: {e}");
            }
        }

        error!(
            "{line}: {} failed: {error}; line is {status}",
            machine.unwrap_or("step")
        );
        self.stopped_from = self.status;
        self.status = status;
        self.error = Some(error);
    }

    fn release_finished_machines(&mut self) {
        let line = self.graph.name().clone();
        let current_station = self.current.map(|i| self.graph.step(i).station.clone());
        let done: Vec<String> = self
            .machines
            .iter()
            .filter(|(name, m)| {
                m.state() == MachineState::End
                    && !m.is_busy()
                    && self.product_at.as_deref() != Some(name.as_str())
            })
            .map(|(name, _)| name.clone())
            .collect();

        for name in done {
            let Some(machine) = self.machines.remove(&name) else {
                continue;
            };
            for station in machine.stations() {
                let in_use = current_station.as_ref() == Some(station)
                    || self.machines.values().any(|m| m.stations().contains(station));
                if !in_use {
                    self.registry.release(station, &line);
                }
            }
            info!("{line}: {name} finished");
        }
    }

    fn next_target(&self) -> Target {
        let Some(current) = self.current else {
            return Target::Step(self.graph.start());
        };
        if self.graph.end() == Some(current) {
            return Target::End;
        }
        self.graph.next(current).map_or(Target::End, Target::Step)
    }

    // ─── Transitions ────────────────────────────────────────────────

    fn switch_state(&mut self, target: Target) {
        let target = match (target, self.current) {
            (Target::Step(_), Some(current)) if self.graph.end() == Some(current) => Target::End,
            _ => target,
        };
        let line = self.graph.name().clone();

        let index = match target {
            Target::End => {
                if self.status != LineStatus::Finishing {
                    info!("{line}: finishing");
                }
                self.waiting_for = None;
                self.status = LineStatus::Finishing;
                return;
            }
            Target::Step(i) => i,
        };

        let step = self.graph.step(index).clone();
        let claim = if step.placeholder {
            StationStatus::Waiting
        } else {
            StationStatus::Running
        };
        match self.registry.try_claim(&step.station, &line, claim) {
            Err(e) => self.fail(step.machine.as_deref(), e),
            Ok(ClaimResult::Rejected { station, held_by }) => {
                if self.waiting_for != Some(target) {
                    info!("{line}: {} waits for {station} held by {held_by}", step.name);
                }
                self.waiting_for = Some(target);
                self.status = LineStatus::Waiting;
            }
            Ok(ClaimResult::Claimed) => {
                self.waiting_for = None;
                self.status = LineStatus::Running;
                self.current = Some(index);
                self.step_done = false;
                info!("{line}: step {} at {}", step.name, step.station);
                self.run_step(index, &step);
            }
        }
    }

    fn run_step(&mut self, index: usize, step: &Step) {
        let Some(name) = step.machine.as_deref().filter(|_| !step.placeholder) else {
            self.step_done = true;
            return;
        };
        if let Err(e) = self.get_machine(name, &step.station) {
            self.fail(None, e);
            return;
        }
        let Some(op) = step.op.clone() else {
            self.step_done = true;
            return;
        };
        // The previous operation of this machine must be accounted for
        // before the next one starts.
        if let Some(completion) = self.machines.get_mut(name).and_then(Machine::wait) {
            let failed = completion.result.clone().err();
            self.on_completion(name, completion);
            if let Some(e) = failed {
                self.fail(Some(name), e);
                return;
            }
        }
        let Some(machine) = self.machines.get_mut(name) else {
            return;
        };
        match machine.dispatch(index, op) {
            Ok(()) => self.step_done = step.background,
            Err(e) => self.fail(Some(name), e),
        }
    }

    /// Existing machine, or a new controller for the claimed station.
    fn get_machine(&mut self, name: &str, station: &StationId) -> FactoryResult<()> {
        if !self.machines.contains_key(name) {
            let controller = self.factory.build(name)?;
            info!("{}: {} {name} ready", self.graph.name(), controller.kind());
            self.machines.insert(name.to_string(), Machine::new(controller));
        }
        if let Some(machine) = self.machines.get_mut(name) {
            machine.add_station(station);
        }
        Ok(())
    }

    fn finish(&mut self) {
        let line = self.graph.name().clone();
        self.machines.clear();
        self.registry.release_line(&line, &[]);
        self.status = LineStatus::End;
        info!("{line}: end");
    }

    // ─── Operator ───────────────────────────────────────────────────

    /// Continue a line stopped by a physical fault.
    ///
    /// Failed machines are cleared, take their last step's station back
    /// and run that step again. A current step that never started because
    /// its machine was still failing an earlier one is claimed again.
    pub fn resume(&mut self) -> FactoryResult<()> {
        let line = self.graph.name().clone();
        if self.status != LineStatus::Problem {
            return Err(FactoryError::InvalidValue(format!(
                "line {line} is {}, only a PROBLEM line can resume",
                self.status
            )));
        }

        let failed: Vec<String> = self
            .machines
            .iter()
            .filter(|(_, m)| m.state() == MachineState::Problem)
            .map(|(name, _)| name.clone())
            .collect();
        for name in failed {
            let Some(machine) = self.machines.get_mut(&name) else {
                continue;
            };
            machine.clear_error();
            let Some(index) = machine.last_step() else {
                continue;
            };
            let step = self.graph.step(index);
            self.registry
                .switch_status(&step.station, StationStatus::Running, &line)?;
            info!("{line}: resuming {name} at step {}", step.name);
            if let Some(op) = step.op.clone() {
                machine.dispatch(index, op)?;
            }
            if let Some(current) = self.current.filter(|c| *c != index) {
                if self.graph.step(current).machine.as_deref() == Some(name.as_str()) {
                    self.waiting_for = Some(Target::Step(current));
                }
            }
        }

        self.failures.clear();
        self.error = None;
        self.status = match self.stopped_from {
            LineStatus::Waiting | LineStatus::Finishing => self.stopped_from,
            _ => LineStatus::Running,
        };
        info!("{line}: resumed, {}", self.status);
        Ok(())
    }

    /// Join in-flight operations and release every station.
    pub fn shutdown(&mut self) {
        for machine in self.machines.values_mut() {
            if let Some(Completion { result: Err(e), .. }) = machine.wait() {
                warn!("{}: {} stopped with {e}", self.graph.name(), machine.name());
            }
        }
        self.machines.clear();
        self.registry.release_line(self.graph.name(), &[]);
        info!("{}: shut down ({})", self.graph.name(), self.status);
    }

    // ─── Status ─────────────────────────────────────────────────────

    pub fn snapshot(&self) -> LineSnapshot {
        let step_name = |t: Target| match t {
            Target::Step(i) => self.graph.step(i).name.clone(),
            Target::End => "END".to_string(),
        };
        LineSnapshot {
            name: self.graph.name().clone(),
            status: self.status,
            step: self.current_step().map(str::to_string),
            waiting_for: self.waiting_for.map(step_name),
            product_at: self.product_at.clone(),
            error: self.error.as_ref().map(ToString::to_string),
        }
    }

    pub fn machine_snapshots(&self) -> Vec<MachineSnapshot> {
        self.machines
            .values()
            .map(|m| m.snapshot(self.graph.name()))
            .collect()
    }
}

impl std::fmt::Debug for LineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineRunner")
            .field("line", self.graph.name())
            .field("status", &self.status)
            .field("step", &self.current_step())
            .field("machines", &self.machines.keys().collect::<Vec<_>>())
            .finish()
    }
}
