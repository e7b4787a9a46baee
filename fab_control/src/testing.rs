//! Deterministic bus for unit tests.
//!
//! Scripted points return their values in order, one per read, and stick
//! at the last value. Plain points behave like memory.

use fab_common::io::bus::{CallbackId, Edge, EdgeCallback, EdgeWait, IoBus, IoError, IoValue};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::thread;
use std::time::Duration;

#[derive(Default)]
pub(crate) struct ScriptedBus {
    scripts: Mutex<HashMap<String, VecDeque<i64>>>,
    values: Mutex<HashMap<String, IoValue>>,
    stuck: HashSet<String>,
    writes: Mutex<Vec<(String, IoValue)>>,
}

impl ScriptedBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, point: &str, values: Vec<i64>) -> Self {
        self.scripts.lock().insert(point.to_string(), values.into());
        self
    }

    pub fn with_point(self, point: &str, value: IoValue) -> Self {
        self.values.lock().insert(point.to_string(), value);
        self
    }

    /// Counter that ignores reset requests.
    pub fn with_stuck_counter(mut self, point: &str) -> Self {
        self.stuck.insert(point.to_string());
        self
    }

    pub fn writes(&self) -> Vec<(String, IoValue)> {
        self.writes.lock().clone()
    }
}

impl IoBus for ScriptedBus {
    fn read(&self, point: &str) -> Result<IoValue, IoError> {
        if let Some(script) = self.scripts.lock().get_mut(point) {
            let value = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().copied()
            };
            return Ok(IoValue::Int(value.unwrap_or(0)));
        }
        self.values
            .lock()
            .get(point)
            .copied()
            .ok_or_else(|| IoError::UnknownPoint(point.to_string()))
    }

    fn write(&self, point: &str, value: IoValue) -> Result<(), IoError> {
        self.values.lock().insert(point.to_string(), value);
        self.writes.lock().push((point.to_string(), value));
        Ok(())
    }

    fn wait_for_edge(
        &self,
        _point: &str,
        _edge: Edge,
        timeout: Duration,
    ) -> Result<EdgeWait, IoError> {
        thread::sleep(timeout);
        Ok(EdgeWait::TimedOut)
    }

    fn register_edge_callback(
        &self,
        _point: &str,
        _edge: Edge,
        _callback: EdgeCallback,
    ) -> Result<CallbackId, IoError> {
        Ok(CallbackId(0))
    }

    fn remove_edge_callback(&self, _id: CallbackId) {}

    fn reset_counter(&self, point: &str) -> Result<(), IoError> {
        if !self.stuck.contains(point) {
            self.scripts
                .lock()
                .insert(point.to_string(), VecDeque::from([0]));
        }
        Ok(())
    }
}
