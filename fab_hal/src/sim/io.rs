//! Point table with linked input reactions.
//!
//! Tracks the value of every named point, a short transition log per
//! point for edge waiters, and the queue of pending reactions.

use crate::config::{PointConfig, ReactionConfig};
use fab_common::io::bus::{Edge, IoError, IoValue};
use fab_common::io::point::IoPointType;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Transitions kept per point for edge waiters.
const TRANSITION_LOG_LEN: usize = 64;

/// One recorded value change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    pub seq: u64,
    pub old: IoValue,
    pub new: IoValue,
}

/// State of one point.
#[derive(Debug, Clone)]
pub(crate) struct PointState {
    pub io_type: IoPointType,
    pub value: IoValue,
    /// Sequence number of the latest transition.
    pub seq: u64,
    pub transitions: VecDeque<Transition>,
}

impl PointState {
    fn new(config: &PointConfig) -> Self {
        let value = match config.io_type {
            IoPointType::Di | IoPointType::Do => IoValue::Bool(config.initial),
            IoPointType::Counter | IoPointType::Pwm => IoValue::Int(config.initial_value),
        };
        Self {
            io_type: config.io_type,
            value,
            seq: 0,
            transitions: VecDeque::with_capacity(TRANSITION_LOG_LEN),
        }
    }

    /// Whether a transition after `since` matches `edge`.
    pub fn edge_since(&self, since: u64, edge: Edge) -> bool {
        self.transitions
            .iter()
            .filter(|t| t.seq > since)
            .any(|t| edge.matches(t.old, t.new))
    }
}

/// Pending input change queued by a reaction.
#[derive(Debug, Clone)]
struct PendingChange {
    at: Instant,
    input: String,
    result: bool,
}

/// Point table.
pub(crate) struct PointTable {
    points: HashMap<String, PointState>,
    reactions: HashMap<String, Vec<ReactionConfig>>,
    pending: VecDeque<PendingChange>,
}

impl PointTable {
    pub fn new(points: &[PointConfig], reactions: &[ReactionConfig]) -> Self {
        let points: HashMap<String, PointState> = points
            .iter()
            .map(|p| (p.name.clone(), PointState::new(p)))
            .collect();

        let mut by_output: HashMap<String, Vec<ReactionConfig>> = HashMap::new();
        for r in reactions {
            by_output.entry(r.output.clone()).or_default().push(r.clone());
        }

        debug!(
            "PointTable initialized: {} points, {} reactions",
            points.len(),
            reactions.len()
        );

        Self {
            points,
            reactions: by_output,
            pending: VecDeque::new(),
        }
    }

    pub fn get(&self, name: &str) -> Result<&PointState, IoError> {
        self.points
            .get(name)
            .ok_or_else(|| IoError::UnknownPoint(name.to_string()))
    }

    pub fn value(&self, name: &str) -> Result<IoValue, IoError> {
        Ok(self.get(name)?.value)
    }

    /// Set a point value. Returns the transition if the value changed.
    ///
    /// Output edges queue their linked reactions.
    pub fn set(
        &mut self,
        name: &str,
        value: IoValue,
        now: Instant,
    ) -> Result<Option<Transition>, IoError> {
        let point = self
            .points
            .get_mut(name)
            .ok_or_else(|| IoError::UnknownPoint(name.to_string()))?;

        let value = match point.io_type {
            IoPointType::Di | IoPointType::Do => IoValue::Bool(value.as_bool()),
            IoPointType::Counter | IoPointType::Pwm => IoValue::Int(value.as_int()),
        };
        if point.value == value {
            return Ok(None);
        }

        point.seq += 1;
        let transition = Transition {
            seq: point.seq,
            old: point.value,
            new: value,
        };
        point.value = value;
        if point.transitions.len() == TRANSITION_LOG_LEN {
            point.transitions.pop_front();
        }
        point.transitions.push_back(transition);

        if point.io_type == IoPointType::Do {
            self.queue_reactions(name, value.as_bool(), now);
        }
        Ok(Some(transition))
    }

    fn queue_reactions(&mut self, output: &str, state: bool, now: Instant) {
        let Some(reactions) = self.reactions.get(output) else {
            return;
        };
        for r in reactions.iter().filter(|r| r.trigger == state) {
            trace!(
                "{} {} -> queued {} = {} in {:.3}s",
                output,
                if state { "ON" } else { "OFF" },
                r.input,
                if r.result { "ON" } else { "OFF" },
                r.delay_s
            );
            self.pending.push_back(PendingChange {
                at: now + Duration::from_secs_f64(r.delay_s.max(0.0)),
                input: r.input.clone(),
                result: r.result,
            });
        }
    }

    /// Apply every pending reaction that is due. Returns the changed inputs.
    pub fn process_pending(&mut self, now: Instant) -> Vec<(String, Transition)> {
        let (due, waiting): (Vec<_>, Vec<_>) = self.pending.drain(..).partition(|c| c.at <= now);
        self.pending = waiting.into();

        let mut changed = Vec::new();
        for change in due {
            match self.set(&change.input, IoValue::Bool(change.result), now) {
                Ok(Some(t)) => {
                    debug!("{} changed: {} -> {}", change.input, t.old, t.new);
                    changed.push((change.input, t));
                }
                Ok(None) => {}
                Err(e) => debug!("dropped reaction: {e}"),
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(name: &str, io_type: IoPointType, initial: bool) -> PointConfig {
        PointConfig {
            name: name.to_string(),
            io_type,
            initial,
            initial_value: 0,
        }
    }

    fn table() -> PointTable {
        PointTable::new(
            &[
                point("M_FWD", IoPointType::Do, false),
                point("LB", IoPointType::Di, true),
            ],
            &[ReactionConfig {
                output: "M_FWD".into(),
                trigger: true,
                delay_s: 0.1,
                input: "LB".into(),
                result: false,
            }],
        )
    }

    #[test]
    fn test_linked_reaction_fires_after_delay() {
        let mut t = table();
        let start = Instant::now();
        t.set("M_FWD", IoValue::Bool(true), start).unwrap();

        assert!(t.process_pending(start + Duration::from_millis(50)).is_empty());
        assert_eq!(t.value("LB").unwrap(), IoValue::Bool(true));

        let changed = t.process_pending(start + Duration::from_millis(150));
        assert_eq!(changed.len(), 1);
        assert_eq!(t.value("LB").unwrap(), IoValue::Bool(false));
    }

    #[test]
    fn test_unchanged_write_is_not_a_transition() {
        let mut t = table();
        let now = Instant::now();
        assert!(t.set("M_FWD", IoValue::Bool(false), now).unwrap().is_none());
        assert!(t.set("M_FWD", IoValue::Bool(true), now).unwrap().is_some());
        assert!(t.set("M_FWD", IoValue::Bool(true), now).unwrap().is_none());
    }

    #[test]
    fn test_edge_since_sequence() {
        let mut t = table();
        let now = Instant::now();
        let seq0 = t.get("LB").unwrap().seq;
        t.set("LB", IoValue::Bool(false), now).unwrap();
        let p = t.get("LB").unwrap();
        assert!(p.edge_since(seq0, Edge::Falling));
        assert!(!p.edge_since(seq0, Edge::Rising));
        assert!(!p.edge_since(p.seq, Edge::Any));
    }

    #[test]
    fn test_unknown_point() {
        let mut t = table();
        assert_eq!(
            t.set("NOPE", IoValue::Bool(true), Instant::now()),
            Err(IoError::UnknownPoint("NOPE".into()))
        );
    }
}
