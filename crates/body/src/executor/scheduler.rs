use std::fmt;
use std::fmt::Debug;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::Task;

/// A periodic task, stopped once it returns [`ControlFlow::Break`].
pub type PeriodicTask = Box<dyn FnMut() -> ControlFlow<()> + Send + 'static>;

pub trait Scheduler: Send + Sync + Debug {
    /// Runs `task` every `period`, the first run after one period.
    fn schedule_periodic(&self, period: Duration, task: PeriodicTask) -> TaskHandle;

    fn schedule_once(&self, delay: Duration, task: Task) -> TaskHandle;
}

/// Cancels the scheduled task when cancelled or dropped.
pub struct TaskHandle {
    canceller: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl TaskHandle {
    pub fn new<F: FnOnce() + Send + Sync + 'static>(canceller: F) -> Self {
        Self { canceller: Some(Box::new(canceller)) }
    }

    /// A handle of a task which can not be cancelled.
    pub fn detached() -> Self {
        Self { canceller: None }
    }

    pub fn cancel(&mut self) {
        if let Some(canceller) = self.canceller.take() {
            canceller()
        }
    }
}

impl From<AbortHandle> for TaskHandle {
    fn from(handle: AbortHandle) -> Self {
        Self::new(move || handle.abort())
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").field("active", &self.canceller.is_some()).finish()
    }
}

/// A [`Scheduler`] driving its tasks with tokio timers.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_periodic(&self, period: Duration, mut task: PeriodicTask) -> TaskHandle {
        let join = self.runtime.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if task().is_break() {
                    break;
                }
            }
        });
        join.abort_handle().into()
    }

    fn schedule_once(&self, delay: Duration, task: Task) -> TaskHandle {
        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        join.abort_handle().into()
    }
}
