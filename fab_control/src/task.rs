//! Background motion tasks with join-and-reraise semantics.
//!
//! A [`MotionTask`] runs one physical operation on its own thread. The
//! failure of the operation surfaces only through [`MotionTask::join`];
//! the type is `#[must_use]` so an unjoined task is a compiler warning.

use fab_common::error::{FactoryError, FactoryResult};
use std::any::Any;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

/// Handle to an operation running in the background.
#[must_use = "a motion task must be joined, its failure is lost otherwise"]
pub struct MotionTask<T> {
    name: String,
    handle: JoinHandle<FactoryResult<T>>,
}

impl<T: Send + 'static> MotionTask<T> {
    /// Run `f` on a new thread named after the task.
    pub fn spawn<F>(name: impl Into<String>, f: F) -> FactoryResult<Self>
    where
        F: FnOnce() -> FactoryResult<T> + Send + 'static,
    {
        let name = name.into();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(f)
            .map_err(|e| FactoryError::Spawn {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        debug!("motion task {name} spawned");
        Ok(Self { name, handle })
    }
}

impl<T> MotionTask<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the operation has completed. `join` will not block then.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the operation and return its result.
    ///
    /// A panic inside the task becomes [`FactoryError::TaskPanicked`].
    pub fn join(self) -> FactoryResult<T> {
        match self.handle.join() {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("motion task {} panicked: {message}", self.name);
                Err(FactoryError::TaskPanicked(format!("{} ({message})", self.name)))
            }
        }
    }
}

impl<T> std::fmt::Debug for MotionTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionTask")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Join every task, then return the first failure in task order.
pub fn join_all<T>(tasks: Vec<MotionTask<T>>) -> FactoryResult<Vec<T>> {
    let mut values = Vec::with_capacity(tasks.len());
    let mut first_error = None;
    for task in tasks {
        match task.join() {
            Ok(v) => values.push(v),
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(values),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn join_returns_value() {
        let task = MotionTask::spawn("ok", || Ok(7)).unwrap();
        assert_eq!(task.name(), "ok");
        assert_eq!(task.join().unwrap(), 7);
    }

    #[test]
    fn join_reraises_failure() {
        let task: MotionTask<()> = MotionTask::spawn("fail", || {
            Err(FactoryError::SensorTimeout {
                sensor: "CB1_END".into(),
                timeout: Duration::from_millis(5),
            })
        })
        .unwrap();
        let err = task.join().unwrap_err();
        assert!(err.is_problem());
    }

    #[test]
    fn panic_becomes_task_panicked() {
        let task: MotionTask<()> = MotionTask::spawn("boom", || panic!("axis jammed")).unwrap();
        match task.join() {
            Err(FactoryError::TaskPanicked(msg)) => {
                assert!(msg.contains("boom"));
                assert!(msg.contains("axis jammed"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn join_all_waits_for_every_task() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for i in 0..3u64 {
            let done = Arc::clone(&done);
            tasks.push(
                MotionTask::spawn(format!("axis{i}"), move || {
                    std::thread::sleep(Duration::from_millis(10 * (3 - i)));
                    done.fetch_add(1, Ordering::SeqCst);
                    if i == 0 {
                        Err(FactoryError::InvalidValue("first".into()))
                    } else if i == 2 {
                        Err(FactoryError::InvalidValue("last".into()))
                    } else {
                        Ok(i)
                    }
                })
                .unwrap(),
            );
        }
        let err = join_all(tasks).unwrap_err();
        assert_eq!(err, FactoryError::InvalidValue("first".into()));
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn finished_flag() {
        let task = MotionTask::spawn("quick", || Ok(())).unwrap();
        let start = std::time::Instant::now();
        while !task.is_finished() && start.elapsed() < Duration::from_secs(2) {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(task.is_finished());
        task.join().unwrap();
    }
}
