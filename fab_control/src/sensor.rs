//! Typed sensor wrapper over a single bus input.
//!
//! | Kind         | `current_value()`       | detection edge |
//! |--------------|-------------------------|----------------|
//! | LightBarrier | inverted input (0/1)    | falling        |
//! | RefSwitch    | raw input (0/1)         | rising         |
//! | Encoder      | raw counter             | -              |
//! | Counter      | raw counter − offset    | -              |
//!
//! A plain pulse counter only counts magnitude. [`Sensor::wait_for_encoder`]
//! reconstructs direction from the expected motion so that counters can
//! stand in for directional encoders.

use fab_common::consts::{
    ENCODER_OVERFLOW_LIMIT, ENCODER_POLL_CYCLE, ENCODER_RESET_ATTEMPTS, ENCODER_RESET_INTERVAL,
};
use fab_common::error::{FactoryError, FactoryResult};
use fab_common::io::bus::{CallbackId, Edge, EdgeWait, IoBus};
use fab_common::io::point::SensorKind;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Handling of a pulse counter that skipped values between two polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterJumpPolicy {
    /// Log the jump, count it as a single pulse and keep waiting.
    #[default]
    Absorb,
    /// Abort the wait with [`FactoryError::CounterJump`].
    Fail,
}

/// Offset change applied to a pulse counter for one poll.
///
/// `diff` is the raw increase since the previous poll and `lower` is true
/// when the target lies below the value at the start of the wait. The
/// corrected value (`raw - offset`) then moves exactly one step in the
/// expected direction for every poll in which the counter moved.
pub const fn counter_correction(diff: i64, lower: bool) -> i64 {
    if diff <= 0 {
        0
    } else if diff == 1 {
        if lower { 2 } else { 0 }
    } else {
        let excess = diff - 1;
        if lower { 2 + excess } else { excess }
    }
}

/// Sensor bound to one bus input.
pub struct Sensor {
    name: String,
    kind: SensorKind,
    bus: Arc<dyn IoBus>,
    offset: AtomicI64,
    jump_policy: CounterJumpPolicy,
    latch: Arc<AtomicBool>,
    monitor: Mutex<Option<CallbackId>>,
}

impl Sensor {
    /// Create a sensor reading the bus point `name`.
    pub fn new(bus: Arc<dyn IoBus>, name: impl Into<String>, kind: SensorKind) -> Self {
        Self {
            name: name.into(),
            kind,
            bus,
            offset: AtomicI64::new(0),
            jump_policy: CounterJumpPolicy::default(),
            latch: Arc::new(AtomicBool::new(false)),
            monitor: Mutex::new(None),
        }
    }

    /// Set the counter jump policy.
    pub fn with_jump_policy(mut self, policy: CounterJumpPolicy) -> Self {
        self.jump_policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    /// Current counter offset.
    pub fn offset(&self) -> i64 {
        self.offset.load(Ordering::Acquire)
    }

    fn read_raw(&self) -> FactoryResult<i64> {
        Ok(self.bus.read_int(&self.name)?)
    }

    fn corrected(&self, raw: i64) -> i64 {
        match self.kind {
            SensorKind::Counter => raw - self.offset(),
            _ => raw,
        }
    }

    /// Edge that marks a detection on this sensor.
    pub fn detection_edge(&self) -> Edge {
        match self.kind {
            SensorKind::LightBarrier => Edge::Falling,
            _ => Edge::Rising,
        }
    }

    /// Current value according to the sensor kind.
    pub fn current_value(&self) -> FactoryResult<i64> {
        let value = match self.kind {
            SensorKind::LightBarrier => i64::from(!self.bus.read_bool(&self.name)?),
            SensorKind::RefSwitch => i64::from(self.bus.read_bool(&self.name)?),
            SensorKind::Encoder | SensorKind::Counter => self.corrected(self.read_raw()?),
        };
        debug!("{} ({}) = {}", self.name, self.kind, value);
        Ok(value)
    }

    /// Whether the sensor currently detects.
    pub fn is_detected(&self) -> FactoryResult<bool> {
        Ok(self.current_value()? != 0)
    }

    /// Block until the sensor detects or `timeout` elapses.
    ///
    /// Returns immediately if the sensor already detects.
    pub fn wait_for_detect(&self, timeout: Duration) -> FactoryResult<()> {
        if self.is_detected()? {
            return Ok(());
        }
        match self.bus.wait_for_edge(&self.name, self.detection_edge(), timeout)? {
            EdgeWait::Edge => Ok(()),
            // The edge may have landed between the check and the wait.
            EdgeWait::TimedOut if self.is_detected()? => Ok(()),
            EdgeWait::TimedOut => Err(FactoryError::SensorTimeout {
                sensor: self.name.clone(),
                timeout,
            }),
        }
    }

    /// Poll until the value is within `threshold` of `target`.
    ///
    /// Returns the corrected value that satisfied the trigger.
    pub fn wait_for_encoder(
        &self,
        target: i64,
        threshold: i64,
        timeout: Duration,
    ) -> FactoryResult<i64> {
        let deadline = Instant::now() + timeout;
        let start_raw = self.read_raw()?;
        if start_raw > ENCODER_OVERFLOW_LIMIT {
            return Err(FactoryError::EncoderOverflow {
                sensor: self.name.clone(),
                raw: start_raw,
                limit: ENCODER_OVERFLOW_LIMIT,
            });
        }

        let start = self.corrected(start_raw);
        let lower = target < start;
        debug!(
            "{}: waiting for {} ±{} from {} ({})",
            self.name,
            target,
            threshold,
            start,
            if lower { "decreasing" } else { "increasing" }
        );

        let mut last_raw = start_raw;
        let mut raw = start_raw;
        loop {
            if self.kind == SensorKind::Counter {
                self.reconcile(last_raw, raw, lower)?;
            }
            last_raw = raw;

            let value = self.corrected(raw);
            if (value - target).abs() <= threshold {
                debug!("{}: triggered at {} (target {})", self.name, value, target);
                return Ok(value);
            }
            if Instant::now() >= deadline {
                return Err(FactoryError::SensorTimeout {
                    sensor: self.name.clone(),
                    timeout,
                });
            }
            thread::sleep(ENCODER_POLL_CYCLE);
            raw = self.read_raw()?;
        }
    }

    fn reconcile(&self, last_raw: i64, raw: i64, lower: bool) -> FactoryResult<()> {
        let diff = raw - last_raw;
        if diff > 1 {
            warn!(
                "{}: counter jumped from {} to {} (offset {}, {})",
                self.name,
                last_raw,
                raw,
                self.offset(),
                if lower { "decreasing" } else { "increasing" }
            );
            if self.jump_policy == CounterJumpPolicy::Fail {
                return Err(FactoryError::CounterJump {
                    sensor: self.name.clone(),
                    from: last_raw,
                    to: raw,
                });
            }
        }
        let delta = counter_correction(diff, lower);
        if delta != 0 {
            self.offset.fetch_add(delta, Ordering::AcqRel);
        }
        Ok(())
    }

    /// Reset the counter and clear the offset.
    pub fn reset_encoder(&self) -> FactoryResult<()> {
        let mut last = 0;
        for attempt in 1..=ENCODER_RESET_ATTEMPTS {
            self.bus.reset_counter(&self.name)?;
            last = self.read_raw()?;
            if last == 0 {
                self.offset.store(0, Ordering::Release);
                debug!("{}: reset after {} attempt(s)", self.name, attempt);
                return Ok(());
            }
            thread::sleep(ENCODER_RESET_INTERVAL);
        }
        Err(FactoryError::EncoderResetTimeout {
            sensor: self.name.clone(),
            attempts: ENCODER_RESET_ATTEMPTS,
            last,
        })
    }

    // ─── Detection monitor ──────────────────────────────────────────

    /// Arm the detection latch.
    ///
    /// Replaces a previously armed monitor and clears the latch.
    pub fn start_monitor(&self) -> FactoryResult<()> {
        let mut monitor = self.monitor.lock();
        if let Some(id) = monitor.take() {
            self.bus.remove_edge_callback(id);
        }
        self.latch.store(false, Ordering::Release);

        let latch = Arc::clone(&self.latch);
        let id = self.bus.register_edge_callback(
            &self.name,
            self.detection_edge(),
            Box::new(move |_, _| latch.store(true, Ordering::Release)),
        )?;
        *monitor = Some(id);
        debug!("{}: monitor armed", self.name);
        Ok(())
    }

    /// Whether a detection edge was seen since [`Sensor::start_monitor`].
    pub fn is_triggered(&self) -> bool {
        self.latch.load(Ordering::Acquire)
    }

    /// Disarm the detection latch. The latch value is kept.
    pub fn remove_monitor(&self) {
        if let Some(id) = self.monitor.lock().take() {
            self.bus.remove_edge_callback(id);
        }
    }
}

impl Drop for Sensor {
    fn drop(&mut self) {
        self.remove_monitor();
    }
}

impl std::fmt::Debug for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("offset", &self.offset())
            .finish()
    }
}
