//! Dispatching of callbacks and timer tasks.
//!
//! Every callback registered on a source or sink carries an [`ExecutionMode`]
//! which decides where it runs:
//!
//! - [`ExecutionMode::Unsynchronized`]: inline, on the thread that triggered it
//! - [`ExecutionMode::NonThreaded`]: on the dispatcher, inline if already there
//! - [`ExecutionMode::MultiThreaded`]: on a worker thread
//!
//! An [`Executor`] provides the dispatcher and the workers, a [`Scheduler`]
//! runs periodic and delayed tasks. Both are bundled with the body
//! configuration in an [`ExecutionContext`].

mod scheduler;
mod tokio_executor;

use std::fmt::Debug;
use std::sync::Arc;

pub use scheduler::{PeriodicTask, Scheduler, TaskHandle, TokioScheduler};
pub use tokio_executor::TokioExecutor;

use crate::config::BodyConfig;
use crate::protocol::BodyError;

/// Where a callback is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    Unsynchronized,
    NonThreaded,
    #[default]
    MultiThreaded,
}

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Executor: Send + Sync + Debug {
    fn run_on_dispatch_thread(&self, task: Task);

    fn run_on_worker_thread(&self, task: Task);

    /// Whether the calling thread currently runs the dispatcher.
    fn is_dispatch_thread(&self) -> bool;

    fn execute(&self, mode: ExecutionMode, task: Task) {
        match mode {
            ExecutionMode::Unsynchronized => task(),
            ExecutionMode::NonThreaded if self.is_dispatch_thread() => task(),
            ExecutionMode::NonThreaded => self.run_on_dispatch_thread(task),
            ExecutionMode::MultiThreaded => self.run_on_worker_thread(task),
        }
    }
}

/// Runs every task on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn run_on_dispatch_thread(&self, task: Task) {
        task()
    }

    fn run_on_worker_thread(&self, task: Task) {
        task()
    }

    fn is_dispatch_thread(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    executor: Arc<dyn Executor>,
    scheduler: Option<Arc<dyn Scheduler>>,
    config: BodyConfig,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::inline()
    }
}

impl ExecutionContext {
    pub fn new(executor: Arc<dyn Executor>, scheduler: Option<Arc<dyn Scheduler>>, config: BodyConfig) -> Self {
        Self { executor, scheduler, config }
    }

    /// Inline execution without timers, using the global configuration.
    pub fn inline() -> Self {
        Self::new(Arc::new(InlineExecutor), None, BodyConfig::global().clone())
    }

    /// Dispatcher, workers and timers of the given tokio runtime.
    pub fn tokio(handle: tokio::runtime::Handle) -> Self {
        let executor = Arc::new(TokioExecutor::new(handle.clone()));
        let scheduler = Arc::new(TokioScheduler::new(handle));
        Self::new(executor, Some(scheduler), BodyConfig::global().clone())
    }

    /// Like [`ExecutionContext::tokio`] with the runtime of the calling thread.
    pub fn try_current() -> Result<Self, BodyError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| BodyError::protocol(format!("no tokio runtime available: {e}")))?;
        Ok(Self::tokio(handle))
    }

    pub fn with_config(mut self, config: BodyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    pub fn scheduler(&self) -> Option<&Arc<dyn Scheduler>> {
        self.scheduler.as_ref()
    }

    pub fn config(&self) -> &BodyConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn inline_executor_runs_every_mode_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));
        for mode in [ExecutionMode::Unsynchronized, ExecutionMode::NonThreaded, ExecutionMode::MultiThreaded] {
            let counter = Arc::clone(&counter);
            InlineExecutor.execute(
                mode,
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn default_mode_is_multi_threaded() {
        assert_eq!(ExecutionMode::default(), ExecutionMode::MultiThreaded);
    }
}
