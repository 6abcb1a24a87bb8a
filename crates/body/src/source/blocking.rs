use std::io;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::debug;

use crate::executor::ExecutionMode;
use crate::handler::BodyDataHandler;
use crate::protocol::BodyError;
use crate::source::{Available, NonBlockingBodySource};
use crate::utils::{self, lock};

/// Bumps a revision on every notification of the source.
#[derive(Debug, Default)]
struct ReadSignal {
    revision: Mutex<u64>,
    changed: Condvar,
}

impl BodyDataHandler for ReadSignal {
    fn on_data(&self, _source: &NonBlockingBodySource) -> Result<(), BodyError> {
        *lock(&self.revision) += 1;
        self.changed.notify_all();
        Ok(())
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Unsynchronized
    }
}

/// Blocking reads over a [`NonBlockingBodySource`].
///
/// A read that would underflow waits until the source changes, then retries.
/// The wait is bounded by the receive timeout, `None` waits forever.
#[derive(Debug)]
pub struct BlockingBodySource {
    source: Arc<NonBlockingBodySource>,
    signal: Arc<ReadSignal>,
    receive_timeout: Option<Duration>,
}

impl BlockingBodySource {
    /// Takes over the data handler of `source`.
    pub fn new(source: Arc<NonBlockingBodySource>) -> Self {
        let signal = Arc::new(ReadSignal::default());
        source.set_data_handler(Some(Arc::clone(&signal) as Arc<dyn BodyDataHandler>));
        let receive_timeout = source.receive_timeout();
        Self { source, signal, receive_timeout }
    }

    pub fn with_receive_timeout(mut self, receive_timeout: Option<Duration>) -> Self {
        self.receive_timeout = receive_timeout;
        self
    }

    pub fn source(&self) -> &Arc<NonBlockingBodySource> {
        &self.source
    }

    /// Never blocks.
    pub fn available(&self) -> Result<Available, BodyError> {
        self.source.available()
    }

    pub fn read_by_length(&self, length: usize) -> Result<Vec<Bytes>, BodyError> {
        self.read_blocking(|source| source.read_by_length(length))
    }

    pub fn read_bytes_by_length(&self, length: usize) -> Result<Bytes, BodyError> {
        self.read_blocking(|source| source.read_bytes_by_length(length))
    }

    pub fn read_by_delimiter(&self, delimiter: &[u8], max_len: usize) -> Result<Vec<Bytes>, BodyError> {
        self.read_blocking(|source| source.read_by_delimiter(delimiter, max_len))
    }

    pub fn read_string_by_length(&self, length: usize) -> Result<String, BodyError> {
        self.read_blocking(|source| source.read_string_by_length(length))
    }

    pub fn read_string_by_delimiter(&self, delimiter: &str, max_len: usize) -> Result<String, BodyError> {
        self.read_blocking(|source| source.read_string_by_delimiter(delimiter, max_len))
    }

    /// Waits for the end of the body and returns everything not read yet.
    pub fn read_to_end_bytes(&self) -> Result<Bytes, BodyError> {
        self.read_blocking(|source| {
            if source.is_complete() {
                source.read_available().map(utils::merge)
            } else {
                source.available().and(Err(BodyError::Underflow))
            }
        })
    }

    /// Waits for the end of the body and returns the unread size.
    pub fn size(&self) -> Result<usize, BodyError> {
        self.read_blocking(|source| {
            if source.is_complete() {
                source.available().map(|available| available.len())
            } else {
                source.available().and(Err(BodyError::Underflow))
            }
        })
    }

    fn read_blocking<T, F>(&self, mut read: F) -> Result<T, BodyError>
    where
        F: FnMut(&NonBlockingBodySource) -> Result<T, BodyError>,
    {
        let deadline = self.receive_timeout.and_then(|timeout| Instant::now().checked_add(timeout));

        loop {
            let revision = *lock(&self.signal.revision);
            match read(self.source.as_ref()) {
                Err(BodyError::Underflow) => {}
                result => return result,
            }

            let guard = lock(&self.signal.revision);
            if *guard != revision {
                continue;
            }

            match deadline {
                None => {
                    drop(self.signal.changed.wait(guard).unwrap_or_else(PoisonError::into_inner));
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let timeout = self.receive_timeout.unwrap_or_default();
                        debug!(id = %self.source.id(), ?timeout, "blocking read timed out");
                        return Err(BodyError::receive_timeout(timeout));
                    }
                    drop(self.signal.changed.wait_timeout(guard, deadline - now).unwrap_or_else(PoisonError::into_inner));
                }
            }
        }
    }
}

impl io::Read for BlockingBodySource {
    /// Returns `0` at the end of the body.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let ranges = self.read_blocking(|source| match source.available()? {
            Available::EndOfStream => Ok(Vec::new()),
            Available::Data(0) => Err(BodyError::Underflow),
            Available::Data(size) => source.read_by_length(size.min(buf.len())),
        })?;

        let mut written = 0;
        for range in ranges {
            buf[written..written + range.len()].copy_from_slice(&range);
            written += range.len();
        }
        Ok(written)
    }
}
