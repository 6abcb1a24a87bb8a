//! The boundary between the body pipeline and the byte transport.
//!
//! Sinks hand their drained and encoded bytes to a [`Transport`]; sources ask
//! the transport they receive from to pause and resume receiving.
//!
//! - [`MemoryTransport`]: collects written bytes in memory
//! - [`IoTransport`]: writes to any tokio [`AsyncWrite`](tokio::io::AsyncWrite)
//! - [`pump_body`]: feeds a source from any tokio [`AsyncRead`](tokio::io::AsyncRead)

mod io_transport;
mod memory;

use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;

pub use io_transport::{IoTransport, ReceiveGate, pump_body};
pub use memory::MemoryTransport;

use crate::handler::WriteCompletionHandler;
use crate::protocol::BodyError;

#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync + Debug {
    /// Hands bytes over for writing and returns how many were accepted.
    ///
    /// The completion handler is notified once the bytes are written, or the
    /// write failed. Completions are signalled in write order.
    fn write(&self, data: Vec<Bytes>, completion: Option<Arc<dyn WriteCompletionHandler>>) -> Result<usize, BodyError>;

    /// Bytes accepted by [`Transport::write`] but not written yet.
    fn pending_write_size(&self) -> usize;

    fn is_open(&self) -> bool;

    fn close(&self) -> Result<(), BodyError>;

    fn suspend_receiving(&self) -> Result<(), BodyError>;

    fn resume_receiving(&self) -> Result<(), BodyError>;

    /// Whether the transport is backed by a network connection, which flow
    /// control applies to.
    fn is_network_endpoint(&self) -> bool {
        true
    }
}
