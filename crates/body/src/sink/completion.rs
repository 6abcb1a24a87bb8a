use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::executor::{Executor, InlineExecutor};
use crate::handler::WriteCompletionHandler;
use crate::protocol::BodyError;
use crate::sink::BodySink;
use crate::utils::lock;

enum Progress {
    /// the transport write call has not returned yet
    Writing,
    /// completed while the transport write call was still running
    Deferred(Result<usize, BodyError>),
    Released,
}

/// The completion of one flush.
///
/// Completions signalled from within the transport write call are deferred
/// until the flushing thread has released its locks.
pub(crate) struct FlushCompletion {
    sink: Weak<BodySink>,
    payload_len: usize,
    callers: Vec<Arc<dyn WriteCompletionHandler>>,
    progress: Mutex<Progress>,
    sync: Option<SyncSignal>,
}

impl FlushCompletion {
    pub(crate) fn new(
        sink: Weak<BodySink>,
        payload_len: usize,
        callers: Vec<Arc<dyn WriteCompletionHandler>>,
        sync: bool,
    ) -> Self {
        Self {
            sink,
            payload_len,
            callers,
            progress: Mutex::new(Progress::Writing),
            sync: sync.then(SyncSignal::default),
        }
    }

    /// Called by the flushing thread once the transport write call returned.
    pub(crate) fn release(&self) {
        let deferred = {
            let mut progress = lock(&self.progress);
            match std::mem::replace(&mut *progress, Progress::Released) {
                Progress::Deferred(result) => Some(result),
                _ => None,
            }
        };
        if let Some(result) = deferred {
            self.complete(result);
        }
    }

    /// Waits for a sync flush, bounded by the send timeout.
    pub(crate) fn wait(&self, send_timeout: Duration) -> Result<(), BodyError> {
        match &self.sync {
            Some(signal) => signal.wait(send_timeout),
            None => Ok(()),
        }
    }

    fn signal(&self, result: Result<usize, BodyError>) {
        {
            let mut progress = lock(&self.progress);
            if let Progress::Writing = *progress {
                *progress = Progress::Deferred(result);
                return;
            }
        }
        self.complete(result);
    }

    pub(crate) fn complete(&self, result: Result<usize, BodyError>) {
        let sink = self.sink.upgrade();
        let executor: Arc<dyn Executor> = match &sink {
            Some(sink) => Arc::clone(sink.context().executor()),
            None => Arc::new(InlineExecutor),
        };

        let result = match result {
            Ok(_) => {
                if let Some(sink) = &sink {
                    sink.record_written(self.payload_len);
                }
                Ok(())
            }
            Err(e) if sink.as_ref().is_some_and(|sink| sink.is_ignore_write_error()) => {
                if let Some(sink) = &sink {
                    debug!(id = %sink.id(), error = %e, len = self.payload_len, "ignore write error");
                    sink.record_ignored(self.payload_len);
                }
                Ok(())
            }
            Err(e) => Err(e),
        };

        for caller in &self.callers {
            let caller = Arc::clone(caller);
            let payload_len = self.payload_len;
            match &result {
                Ok(()) => executor.execute(caller.execution_mode(), Box::new(move || caller.on_written(payload_len))),
                Err(e) => {
                    let e = e.clone();
                    executor.execute(caller.execution_mode(), Box::new(move || caller.on_exception(&e)))
                }
            }
        }

        if let Some(signal) = &self.sync {
            signal.set(result);
        }
    }
}

impl WriteCompletionHandler for FlushCompletion {
    fn on_written(&self, written: usize) {
        self.signal(Ok(written));
    }

    fn on_exception(&self, error: &BodyError) {
        self.signal(Err(error.clone()));
    }
}

#[derive(Debug, Default)]
struct SyncSignal {
    result: Mutex<Option<Result<(), BodyError>>>,
    done: Condvar,
}

impl SyncSignal {
    fn set(&self, result: Result<(), BodyError>) {
        *lock(&self.result) = Some(result);
        self.done.notify_all();
    }

    fn wait(&self, timeout: Duration) -> Result<(), BodyError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut result = lock(&self.result);
        loop {
            if let Some(result) = result.take() {
                return result;
            }
            match deadline {
                None => result = self.done.wait(result).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(BodyError::send_timeout(timeout));
                    }
                    result = self.done.wait_timeout(result, deadline - now).unwrap_or_else(PoisonError::into_inner).0;
                }
            }
        }
    }
}
