use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, trace};

use super::{Executor, Task};

tokio::task_local! {
    static ON_DISPATCHER: ();
}

/// An [`Executor`] backed by a tokio runtime.
///
/// The dispatcher is a single task draining a channel, so dispatcher tasks
/// run one after another in submission order. Worker tasks run on the
/// blocking pool, where they may block on sync flushes and blocking reads.
#[derive(Debug)]
pub struct TokioExecutor {
    dispatch_tx: mpsc::UnboundedSender<Task>,
    runtime: Handle,
    dispatcher: JoinHandle<()>,
}

impl TokioExecutor {
    pub fn new(runtime: Handle) -> Self {
        let (dispatch_tx, mut dispatch_rx) = mpsc::unbounded_channel::<Task>();
        let dispatcher = runtime.spawn(ON_DISPATCHER.scope((), async move {
            while let Some(task) = dispatch_rx.recv().await {
                task();
            }
            trace!("dispatcher stopped");
        }));
        Self { dispatch_tx, runtime, dispatcher }
    }
}

impl Executor for TokioExecutor {
    fn run_on_dispatch_thread(&self, task: Task) {
        if self.dispatch_tx.send(task).is_err() {
            error!("dispatcher is gone, task dropped");
        }
    }

    fn run_on_worker_thread(&self, task: Task) {
        drop(self.runtime.spawn_blocking(task));
    }

    fn is_dispatch_thread(&self) -> bool {
        ON_DISPATCHER.try_with(|_| ()).is_ok()
    }
}

impl Drop for TokioExecutor {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionMode;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    #[tokio::test(flavor = "multi_thread")]
    async fn non_threaded_tasks_run_on_dispatcher() {
        let executor = Arc::new(TokioExecutor::new(Handle::current()));
        assert!(!executor.is_dispatch_thread());

        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&executor);
        executor.execute(
            ExecutionMode::NonThreaded,
            Box::new(move || {
                let _ = tx.send(inner.is_dispatch_thread());
            }),
        );
        assert!(rx.await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn multi_threaded_tasks_run_on_workers() {
        let executor = Arc::new(TokioExecutor::new(Handle::current()));

        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&executor);
        executor.execute(
            ExecutionMode::MultiThreaded,
            Box::new(move || {
                let _ = tx.send(inner.is_dispatch_thread());
            }),
        );
        assert!(!rx.await.unwrap());
    }
}
