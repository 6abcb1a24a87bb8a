//! Callbacks invoked by body sources and sinks.

mod listener;

pub use listener::Listener;
pub(crate) use listener::{Listeners, run_all};

use std::fmt;

use crate::executor::ExecutionMode;
use crate::protocol::BodyError;
use crate::source::NonBlockingBodySource;

/// Called whenever data arrives at a source, the source completes, or the
/// source fails.
///
/// Calls for one source never overlap. Notifications arriving while the
/// handler runs are coalesced into one more call.
pub trait BodyDataHandler: Send + Sync {
    /// Returning an error destroys the source.
    fn on_data(&self, source: &NonBlockingBodySource) -> Result<(), BodyError>;

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::MultiThreaded
    }
}

/// Notified once the bytes of a flush have been written to the transport,
/// or the write failed.
pub trait WriteCompletionHandler: Send + Sync {
    fn on_written(&self, written: usize);

    fn on_exception(&self, error: &BodyError);

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::MultiThreaded
    }
}

pub struct DataHandlerFn<F> {
    f: F,
    mode: ExecutionMode,
}

impl<F> fmt::Debug for DataHandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataHandlerFn").field("mode", &self.mode).finish()
    }
}

impl<F> BodyDataHandler for DataHandlerFn<F>
where
    F: Fn(&NonBlockingBodySource) -> Result<(), BodyError> + Send + Sync,
{
    fn on_data(&self, source: &NonBlockingBodySource) -> Result<(), BodyError> {
        (self.f)(source)
    }

    fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }
}

pub fn make_data_handler<F>(mode: ExecutionMode, f: F) -> DataHandlerFn<F>
where
    F: Fn(&NonBlockingBodySource) -> Result<(), BodyError> + Send + Sync,
{
    DataHandlerFn { f, mode }
}
