//! Simulation stepping thread.

use super::bus::SimBus;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default simulation period.
pub const DEFAULT_SIM_PERIOD: Duration = Duration::from_millis(1);

/// Background thread advancing a [`SimBus`] in real time.
///
/// The thread stops when the driver is dropped.
pub struct SimDriver {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimDriver {
    /// Start stepping `bus` every `period`.
    pub fn start(bus: Arc<SimBus>, period: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("fab-sim".into())
            .spawn(move || {
                debug!("simulation thread started, period={period:?}");
                let mut last = Instant::now();
                while flag.load(Ordering::Acquire) {
                    thread::sleep(period);
                    let now = Instant::now();
                    bus.step(now - last);
                    last = now;
                }
                debug!("simulation thread stopped");
            });

        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                warn!("failed to spawn simulation thread: {e}");
                running.store(false, Ordering::Release);
                None
            }
        };
        Self { running, handle }
    }

    /// Start with [`DEFAULT_SIM_PERIOD`].
    pub fn start_default(bus: Arc<SimBus>) -> Self {
        Self::start(bus, DEFAULT_SIM_PERIOD)
    }

    /// Whether the stepping thread is alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.handle.is_some()
    }

    /// Stop the thread and wait for it.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SimDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
