use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;

use bytes::Bytes;
use tracing::trace;

use crate::handler::WriteCompletionHandler;
use crate::protocol::BodyError;
use crate::transport::Transport;
use crate::utils::{self, lock};

struct PendingWrite {
    data: Vec<Bytes>,
    len: usize,
    completion: Option<Arc<dyn WriteCompletionHandler>>,
}

#[derive(Default)]
struct MemoryState {
    written: Vec<Bytes>,
    pending: VecDeque<PendingWrite>,
    open: bool,
    receiving_suspended: bool,
    suspend_count: usize,
    resume_count: usize,
}

/// A [`Transport`] keeping everything written in memory.
///
/// By default writes complete immediately. A manual transport keeps writes
/// pending until [`MemoryTransport::complete_pending`] or
/// [`MemoryTransport::fail_pending`] is called.
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
    auto_complete: bool,
    network_endpoint: bool,
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("MemoryTransport")
            .field("written", &utils::remaining(&state.written))
            .field("pending", &state.pending.len())
            .field("open", &state.open)
            .finish()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_auto_complete(true)
    }

    pub fn manual() -> Self {
        Self::with_auto_complete(false)
    }

    fn with_auto_complete(auto_complete: bool) -> Self {
        let state = MemoryState { open: true, ..Default::default() };
        Self { state: Mutex::new(state), auto_complete, network_endpoint: false }
    }

    /// Makes the transport take part in flow control like a network connection.
    pub fn as_network_endpoint(mut self) -> Self {
        self.network_endpoint = true;
        self
    }

    /// Everything written so far, merged.
    pub fn written(&self) -> Bytes {
        utils::merge(lock(&self.state).written.clone())
    }

    /// Completes all pending writes in order, returns the number of bytes.
    pub fn complete_pending(&self) -> usize {
        let mut total = 0;
        while let Some(written) = self.complete_next() {
            total += written;
        }
        total
    }

    /// Completes the oldest pending write.
    pub fn complete_next(&self) -> Option<usize> {
        let pending = {
            let mut state = lock(&self.state);
            let pending = state.pending.pop_front()?;
            state.written.extend(pending.data.iter().cloned());
            pending
        };
        trace!(len = pending.len, "complete pending write");
        if let Some(completion) = pending.completion {
            completion.on_written(pending.len);
        }
        Some(pending.len)
    }

    /// Fails all pending writes, their bytes are dropped.
    pub fn fail_pending(&self, error: BodyError) {
        let pending: Vec<PendingWrite> = lock(&self.state).pending.drain(..).collect();
        for write in pending {
            if let Some(completion) = write.completion {
                completion.on_exception(&error);
            }
        }
    }

    pub fn is_receiving_suspended(&self) -> bool {
        lock(&self.state).receiving_suspended
    }

    pub fn suspend_count(&self) -> usize {
        lock(&self.state).suspend_count
    }

    pub fn resume_count(&self) -> usize {
        lock(&self.state).resume_count
    }
}

impl Transport for MemoryTransport {
    fn write(&self, data: Vec<Bytes>, completion: Option<Arc<dyn WriteCompletionHandler>>) -> Result<usize, BodyError> {
        let len = utils::remaining(&data);
        {
            let mut state = lock(&self.state);
            if !state.open {
                return Err(BodyError::closed("transport is closed"));
            }
            if !self.auto_complete {
                state.pending.push_back(PendingWrite { data, len, completion });
                return Ok(len);
            }
            state.written.extend(data);
        }

        if let Some(completion) = completion {
            completion.on_written(len);
        }
        Ok(len)
    }

    fn pending_write_size(&self) -> usize {
        lock(&self.state).pending.iter().map(|write| write.len).sum()
    }

    fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    fn close(&self) -> Result<(), BodyError> {
        lock(&self.state).open = false;
        Ok(())
    }

    fn suspend_receiving(&self) -> Result<(), BodyError> {
        let mut state = lock(&self.state);
        state.receiving_suspended = true;
        state.suspend_count += 1;
        Ok(())
    }

    fn resume_receiving(&self) -> Result<(), BodyError> {
        let mut state = lock(&self.state);
        state.receiving_suspended = false;
        state.resume_count += 1;
        Ok(())
    }

    fn is_network_endpoint(&self) -> bool {
        self.network_endpoint
    }
}
