//! `SimBus`: in-process implementation of the plant I/O bus.

use super::axis::AxisSim;
use super::io::{PointTable, Transition};
use crate::config::{SimConfig, SimConfigError};
use fab_common::config::ConfigError;
use fab_common::consts::SIM_WRITE_HISTORY_LEN;
use fab_common::io::bus::{CallbackId, Edge, EdgeCallback, EdgeWait, IoBus, IoError, IoValue};
use fab_common::io::point::IoPointType;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// One recorded output write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    /// Time since the bus was created.
    pub at: Duration,
    /// Written point.
    pub point: String,
    /// Written value.
    pub value: IoValue,
}

struct CallbackEntry {
    id: CallbackId,
    point: String,
    edge: Edge,
    callback: Arc<EdgeCallback>,
}

struct SimState {
    table: PointTable,
    axes: Vec<AxisSim>,
    /// Most recent output writes, at most `SIM_WRITE_HISTORY_LEN`.
    history: VecDeque<WriteRecord>,
}

/// Simulated plant I/O bus.
///
/// All state sits behind a single lock; edge waiters park on a condvar
/// that is notified on every value change.
pub struct SimBus {
    state: Mutex<SimState>,
    changed: Condvar,
    callbacks: Mutex<Vec<CallbackEntry>>,
    next_callback: AtomicU64,
    started: Instant,
}

impl SimBus {
    /// Create a bus from a validated configuration.
    pub fn new(config: &SimConfig) -> Result<Self, SimConfigError> {
        config.validate()?;
        let table = PointTable::new(&config.points, &config.reactions);
        let axes: Vec<AxisSim> = config.axes.iter().cloned().map(AxisSim::new).collect();

        info!(
            "SimBus created: {} points, {} reactions, {} axes",
            config.points.len(),
            config.reactions.len(),
            axes.len()
        );

        let bus = Self {
            state: Mutex::new(SimState {
                table,
                axes,
                history: VecDeque::with_capacity(SIM_WRITE_HISTORY_LEN),
            }),
            changed: Condvar::new(),
            callbacks: Mutex::new(Vec::new()),
            next_callback: AtomicU64::new(1),
            started: Instant::now(),
        };
        // Publish initial axis feedback and reference switch states.
        bus.step(Duration::ZERO);
        Ok(bus)
    }

    /// Parse `io.toml` content and create a bus.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config = SimConfig::from_toml(content)?;
        Ok(Self::new(&config)?)
    }

    /// Advance the simulation by `dt`.
    pub fn step(&self, dt: Duration) {
        let now = Instant::now();
        let mut fired: Vec<(String, Transition)> = Vec::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            fired.extend(state.table.process_pending(now));

            for axis in state.axes.iter_mut() {
                let cfg = axis.config();
                let increase = state
                    .table
                    .value(&cfg.increase)
                    .map(IoValue::as_bool)
                    .unwrap_or(false);
                let decrease = state
                    .table
                    .value(&cfg.decrease)
                    .map(IoValue::as_bool)
                    .unwrap_or(false);
                let pwm = match &cfg.pwm {
                    Some(p) => state.table.value(p).map(IoValue::as_int).unwrap_or(0),
                    None => 100,
                };

                let outputs = axis.step(increase, decrease, pwm, dt);
                for (point, value) in outputs.encoder.into_iter().chain(outputs.ref_switch) {
                    if let Ok(Some(t)) = state.table.set(&point, value, now) {
                        fired.push((point, t));
                    }
                }
            }
        }
        self.publish(fired);
    }

    /// Force a point to a value, bypassing the output check.
    ///
    /// Used by tests and operator tooling to emulate sensor events.
    pub fn inject(&self, point: &str, value: IoValue) -> Result<(), IoError> {
        let transition = {
            let mut state = self.state.lock();
            state.table.set(point, value, Instant::now())?
        };
        if let Some(t) = transition {
            debug!("injected {point} = {}", t.new);
            self.publish(vec![(point.to_string(), t)]);
        }
        Ok(())
    }

    /// Recent output writes, oldest first.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Recent writes of a single point, oldest first.
    pub fn history(&self, point: &str) -> Vec<WriteRecord> {
        self.state
            .lock()
            .history
            .iter()
            .filter(|r| r.point == point)
            .cloned()
            .collect()
    }

    /// Physical position of a simulated axis.
    pub fn axis_position(&self, axis: &str) -> Option<f64> {
        self.state
            .lock()
            .axes
            .iter()
            .find(|a| a.config().name == axis)
            .map(AxisSim::position)
    }

    /// Time since the bus was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Wake edge waiters and run matching callbacks outside the state lock.
    fn publish(&self, fired: Vec<(String, Transition)>) {
        if fired.is_empty() {
            return;
        }
        self.changed.notify_all();

        let to_call: Vec<(Arc<EdgeCallback>, String, IoValue)> = {
            let callbacks = self.callbacks.lock();
            fired
                .iter()
                .flat_map(|(point, t)| {
                    callbacks
                        .iter()
                        .filter(move |c| c.point == *point && c.edge.matches(t.old, t.new))
                        .map(move |c| (Arc::clone(&c.callback), point.clone(), t.new))
                })
                .collect()
        };
        for (callback, point, value) in to_call {
            (**callback)(&point, value);
        }
    }
}

impl IoBus for SimBus {
    fn read(&self, point: &str) -> Result<IoValue, IoError> {
        let value = self.state.lock().table.value(point)?;
        trace!("read {point} = {value}");
        Ok(value)
    }

    fn write(&self, point: &str, value: IoValue) -> Result<(), IoError> {
        let transition = {
            let mut state = self.state.lock();
            if !state.table.get(point)?.io_type.is_output() {
                return Err(IoError::NotWritable(point.to_string()));
            }
            let at = self.started.elapsed();
            if state.history.len() == SIM_WRITE_HISTORY_LEN {
                state.history.pop_front();
            }
            state.history.push_back(WriteRecord {
                at,
                point: point.to_string(),
                value,
            });
            state.table.set(point, value, Instant::now())?
        };
        if let Some(t) = transition {
            self.publish(vec![(point.to_string(), t)]);
        }
        Ok(())
    }

    fn wait_for_edge(
        &self,
        point: &str,
        edge: Edge,
        timeout: Duration,
    ) -> Result<EdgeWait, IoError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        let since = state.table.get(point)?.seq;
        loop {
            if state.table.get(point)?.edge_since(since, edge) {
                return Ok(EdgeWait::Edge);
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                let hit = state.table.get(point)?.edge_since(since, edge);
                return Ok(if hit { EdgeWait::Edge } else { EdgeWait::TimedOut });
            }
        }
    }

    fn register_edge_callback(
        &self,
        point: &str,
        edge: Edge,
        callback: EdgeCallback,
    ) -> Result<CallbackId, IoError> {
        self.state.lock().table.get(point)?;
        let id = CallbackId(self.next_callback.fetch_add(1, Ordering::Relaxed));
        self.callbacks.lock().push(CallbackEntry {
            id,
            point: point.to_string(),
            edge,
            callback: Arc::new(callback),
        });
        Ok(id)
    }

    fn remove_edge_callback(&self, id: CallbackId) {
        self.callbacks.lock().retain(|c| c.id != id);
    }

    fn reset_counter(&self, point: &str) -> Result<(), IoError> {
        let transition = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.table.get(point)?.io_type != IoPointType::Counter {
                return Err(IoError::NotACounter(point.to_string()));
            }
            let value = match state.axes.iter_mut().find(|a| a.config().encoder == point) {
                Some(axis) => {
                    axis.reset_feedback();
                    axis.feedback()
                }
                None => 0,
            };
            state.table.set(point, IoValue::Int(value), Instant::now())?
        };
        if let Some(t) = transition {
            self.publish(vec![(point.to_string(), t)]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    const CONFIG: &str = r#"
[[points]]
name = "M_FWD"
type = "do"

[[points]]
name = "LB"
type = "di"
initial = true

[[points]]
name = "CNT"
type = "counter"
"#;

    fn bus() -> Arc<SimBus> {
        Arc::new(SimBus::from_toml(CONFIG).unwrap())
    }

    #[test]
    fn write_records_history_and_rejects_inputs() {
        let bus = bus();
        bus.write("M_FWD", IoValue::Bool(true)).unwrap();
        assert_eq!(bus.read("M_FWD").unwrap(), IoValue::Bool(true));
        assert_eq!(bus.history("M_FWD").len(), 1);
        assert_eq!(
            bus.write("LB", IoValue::Bool(false)),
            Err(IoError::NotWritable("LB".into()))
        );
    }

    #[test]
    fn write_history_keeps_only_recent_writes() {
        let bus = bus();
        for i in 0..SIM_WRITE_HISTORY_LEN + 10 {
            bus.write("M_FWD", IoValue::Bool(i % 2 == 0)).unwrap();
        }
        let writes = bus.writes();
        assert_eq!(writes.len(), SIM_WRITE_HISTORY_LEN);
        // The first ten writes were dropped: index 10 is an even write.
        assert_eq!(writes[0].value, IoValue::Bool(true));
        assert!(writes.windows(2).all(|w| w[0].at <= w[1].at));
    }

    #[test]
    fn wait_for_edge_wakes_on_injection() {
        let bus = bus();
        let injector = Arc::clone(&bus);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            injector.inject("LB", IoValue::Bool(false)).unwrap();
        });
        let result = bus
            .wait_for_edge("LB", Edge::Falling, Duration::from_secs(2))
            .unwrap();
        handle.join().unwrap();
        assert_eq!(result, EdgeWait::Edge);
    }

    #[test]
    fn wait_for_edge_times_out() {
        let bus = bus();
        let start = Instant::now();
        let result = bus
            .wait_for_edge("LB", Edge::Falling, Duration::from_millis(40))
            .unwrap();
        assert_eq!(result, EdgeWait::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn callbacks_fire_on_matching_edge_only() {
        let bus = bus();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = bus
            .register_edge_callback(
                "LB",
                Edge::Falling,
                Box::new(move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        bus.inject("LB", IoValue::Bool(false)).unwrap();
        bus.inject("LB", IoValue::Bool(true)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        bus.remove_edge_callback(id);
        bus.inject("LB", IoValue::Bool(false)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_counter_requires_counter_point() {
        let bus = bus();
        bus.inject("CNT", IoValue::Int(17)).unwrap();
        bus.reset_counter("CNT").unwrap();
        assert_eq!(bus.read_int("CNT").unwrap(), 0);
        assert_eq!(
            bus.reset_counter("LB"),
            Err(IoError::NotACounter("LB".into()))
        );
    }
}
