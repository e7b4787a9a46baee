//! Line step graph, resolved once from configuration.
//!
//! Step names, machine names and stations are checked when the plant is
//! loaded; at run time a line only handles step indices.

use crate::config::{LineConfig, LineFlag, LineFlags, PlantConfig, StepConfig};
use crate::machine::Operation;
use fab_common::config::ConfigError;
use fab_common::station::{LineId, StationId};
use std::collections::HashMap;

/// Resolved successor of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub target: usize,
    pub when: Vec<LineFlag>,
    pub unless: Vec<LineFlag>,
}

impl Transition {
    fn matches(&self, flags: &LineFlags) -> bool {
        self.when.iter().all(|f| flags.is_set(*f)) && !self.unless.iter().any(|f| flags.is_set(*f))
    }
}

/// One resolved step.
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    /// Station claimed before the step runs.
    pub station: StationId,
    pub machine: Option<String>,
    pub op: Option<Operation>,
    pub finish: bool,
    pub background: bool,
    pub moves_product: bool,
    pub placeholder: bool,
    pub next: Vec<Transition>,
}

/// Step graph of one line.
#[derive(Debug, Clone)]
pub struct LineGraph {
    name: LineId,
    steps: Vec<Step>,
    start: usize,
    end: Option<usize>,
    flags: LineFlags,
    color: Option<String>,
}

fn invalid(line: &LineId, msg: String) -> ConfigError {
    ConfigError::ValidationError(format!("line {line}: {msg}"))
}

impl LineGraph {
    /// Check `line` against the plant and resolve names to indices.
    pub fn resolve(line: &LineConfig, plant: &PlantConfig) -> Result<Self, ConfigError> {
        let name = &line.name;
        let mut index = HashMap::new();
        for (i, step) in line.steps.iter().enumerate() {
            if index.insert(step.name.as_str(), i).is_some() {
                return Err(invalid(name, format!("duplicate step {}", step.name)));
            }
        }
        let lookup = |step: &str, owner: &str| {
            index
                .get(step)
                .copied()
                .ok_or_else(|| invalid(name, format!("{owner} refers to unknown step {step}")))
        };

        let mut steps = Vec::with_capacity(line.steps.len());
        for step in &line.steps {
            let mut resolved = Self::resolve_step(name, step, plant, line.color.as_deref())?;
            for t in &step.next {
                resolved.next.push(Transition {
                    target: lookup(&t.step, &step.name)?,
                    when: t.when.clone(),
                    unless: t.unless.clone(),
                });
            }
            steps.push(resolved);
        }

        let start = lookup(&line.start_at, "start_at")?;
        let end = line
            .end_at
            .as_deref()
            .map(|s| lookup(s, "end_at"))
            .transpose()?;

        Ok(Self {
            name: name.clone(),
            steps,
            start,
            end,
            flags: line.flags(),
            color: line.color.clone(),
        })
    }

    fn resolve_step(
        line: &LineId,
        step: &StepConfig,
        plant: &PlantConfig,
        color: Option<&str>,
    ) -> Result<Step, ConfigError> {
        let machine = match &step.machine {
            Some(m) => Some(plant.machines.get(m).ok_or_else(|| {
                invalid(line, format!("step {} uses unknown machine {m}", step.name))
            })?),
            None => None,
        };

        let station = step
            .station
            .clone()
            .or_else(|| machine.map(|m| m.station().clone()))
            .ok_or_else(|| invalid(line, format!("step {} has no station", step.name)))?;
        if !plant.has_station(&station) {
            return Err(invalid(
                line,
                format!("step {} uses unknown station {station}", step.name),
            ));
        }

        if step.placeholder && (step.op.is_some() || step.machine.is_some()) {
            return Err(invalid(
                line,
                format!("placeholder step {} cannot run a machine", step.name),
            ));
        }

        let op = match (&step.op, machine) {
            (None, _) => None,
            (Some(_), None) => {
                return Err(invalid(
                    line,
                    format!("step {} has an operation but no machine", step.name),
                ));
            }
            (Some(op), Some(m)) => {
                if !m.kind().supports(op) {
                    return Err(invalid(
                        line,
                        format!("step {}: {} cannot {op}", step.name, m.kind()),
                    ));
                }
                if let Some(sensor) = op.sensor() {
                    if !m.sensor_names().contains(&sensor) {
                        return Err(invalid(
                            line,
                            format!("step {} uses unknown sensor {sensor}", step.name),
                        ));
                    }
                }
                Some(op.clone().with_default_color(color))
            }
        };

        Ok(Step {
            name: step.name.clone(),
            station,
            machine: step.machine.clone(),
            op,
            finish: step.finish,
            background: step.background,
            moves_product: step.moves_product,
            placeholder: step.placeholder,
            next: Vec::new(),
        })
    }

    pub fn name(&self) -> &LineId {
        &self.name
    }

    pub fn step(&self, index: usize) -> &Step {
        &self.steps[index]
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> Option<usize> {
        self.end
    }

    pub fn flags(&self) -> LineFlags {
        self.flags
    }

    pub fn color(&self) -> Option<&str> {
        self.color.as_deref()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }

    /// First successor of `step` whose flag conditions hold, `None` ends the line.
    pub fn next(&self, step: usize) -> Option<usize> {
        self.steps[step]
            .next
            .iter()
            .find(|t| t.matches(&self.flags))
            .map(|t| t.target)
    }
}
