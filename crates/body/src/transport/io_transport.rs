//! Binding of the body pipeline to tokio I/O.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, trace};

use crate::codec::PayloadDecoder;
use crate::handler::WriteCompletionHandler;
use crate::protocol::{BodyError, PayloadItem, PayloadSize};
use crate::source::NonBlockingBodySource;
use crate::transport::Transport;
use crate::utils;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Lets a reader pause while the receiving side is suspended.
#[derive(Debug, Clone)]
pub struct ReceiveGate {
    open: Arc<watch::Sender<bool>>,
}

impl Default for ReceiveGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveGate {
    pub fn new() -> Self {
        let (open, _) = watch::channel(true);
        Self { open: Arc::new(open) }
    }

    pub fn open(&self) {
        self.open.send_replace(true);
    }

    pub fn close(&self) {
        self.open.send_replace(false);
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    /// Resolves once the gate is open.
    pub async fn opened(&self) {
        let mut receiver = self.open.subscribe();
        // the sender lives in self, so waiting can not fail
        let _ = receiver.wait_for(|open| *open).await;
    }
}

enum Command {
    Write { data: Vec<Bytes>, len: usize, completion: Option<Arc<dyn WriteCompletionHandler>> },
    Close,
}

/// A [`Transport`] over a tokio [`AsyncWrite`].
///
/// Writes are queued to a writer task which writes and flushes them in order
/// and then fires their completions. Suspending the transport closes its
/// [`ReceiveGate`].
pub struct IoTransport {
    id: String,
    commands: mpsc::UnboundedSender<Command>,
    pending: Arc<AtomicUsize>,
    open: Arc<AtomicBool>,
    gate: ReceiveGate,
    writer_task: AbortHandle,
}

impl fmt::Debug for IoTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoTransport")
            .field("id", &self.id)
            .field("pending", &self.pending.load(Ordering::SeqCst))
            .field("open", &self.open.load(Ordering::SeqCst))
            .field("receiving", &self.gate.is_open())
            .finish()
    }
}

impl IoTransport {
    pub fn new<W>(writer: W, handle: &Handle) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let id = utils::next_id("transport");
        let (commands, receiver) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let open = Arc::new(AtomicBool::new(true));

        let writer_task = handle
            .spawn(run_writer(id.clone(), writer, receiver, Arc::clone(&pending), Arc::clone(&open)))
            .abort_handle();

        Self { id, commands, pending, open, gate: ReceiveGate::new(), writer_task }
    }

    /// The gate readers of this connection wait on.
    pub fn gate(&self) -> ReceiveGate {
        self.gate.clone()
    }
}

impl Drop for IoTransport {
    fn drop(&mut self) {
        if self.open.load(Ordering::SeqCst) {
            self.writer_task.abort();
        }
    }
}

async fn run_writer<W>(
    id: String,
    mut writer: W,
    mut commands: mpsc::UnboundedReceiver<Command>,
    pending: Arc<AtomicUsize>,
    open: Arc<AtomicBool>,
) where
    W: AsyncWrite + Unpin,
{
    let mut failure: Option<BodyError> = None;

    while let Some(command) = commands.recv().await {
        match command {
            Command::Write { data, len, completion } => {
                let result = match &failure {
                    Some(e) => Err(e.clone()),
                    None => write_data(&mut writer, &data).await,
                };
                pending.fetch_sub(len, Ordering::SeqCst);

                match result {
                    Ok(()) => {
                        trace!(id = %id, len, "written");
                        if let Some(completion) = completion {
                            completion.on_written(len);
                        }
                    }
                    Err(e) => {
                        if failure.is_none() {
                            error!(id = %id, error = %e, "write failed");
                            open.store(false, Ordering::SeqCst);
                            failure = Some(e.clone());
                        }
                        if let Some(completion) = completion {
                            completion.on_exception(&e);
                        }
                    }
                }
            }
            Command::Close => {
                if let Err(e) = writer.shutdown().await {
                    debug!(id = %id, error = %e, "shutdown failed");
                }
                debug!(id = %id, "writer closed");
                break;
            }
        }
    }
}

async fn write_data<W>(writer: &mut W, data: &[Bytes]) -> Result<(), BodyError>
where
    W: AsyncWrite + Unpin,
{
    for bytes in data {
        writer.write_all(bytes).await?;
    }
    Ok(writer.flush().await?)
}

impl Transport for IoTransport {
    fn write(&self, data: Vec<Bytes>, completion: Option<Arc<dyn WriteCompletionHandler>>) -> Result<usize, BodyError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(BodyError::closed(format!("{} is closed", self.id)));
        }

        let len = utils::remaining(&data);
        self.pending.fetch_add(len, Ordering::SeqCst);
        if self.commands.send(Command::Write { data, len, completion }).is_err() {
            self.pending.fetch_sub(len, Ordering::SeqCst);
            return Err(BodyError::closed(format!("{} writer is gone", self.id)));
        }
        Ok(len)
    }

    fn pending_write_size(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<(), BodyError> {
        if self.open.swap(false, Ordering::SeqCst) {
            // a writer that is already gone has nothing left to shut down
            let _ = self.commands.send(Command::Close);
        }
        Ok(())
    }

    fn suspend_receiving(&self) -> Result<(), BodyError> {
        self.gate.close();
        Ok(())
    }

    fn resume_receiving(&self) -> Result<(), BodyError> {
        self.gate.open();
        Ok(())
    }
}

/// Reads a body framed as `payload_size` from `reader` into `source`.
///
/// Reading pauses while `gate` is closed. A body that ends before its framing
/// says so fails the source.
pub async fn pump_body<R>(
    reader: R,
    payload_size: PayloadSize,
    source: Arc<NonBlockingBodySource>,
    gate: ReceiveGate,
) -> Result<(), BodyError>
where
    R: AsyncRead + Unpin,
{
    let mut framed = FramedRead::with_capacity(reader, PayloadDecoder::for_size(payload_size), READ_BUFFER_SIZE);

    loop {
        gate.opened().await;

        match framed.next().await {
            Some(Ok(PayloadItem::Chunk(bytes))) => {
                source.append(bytes)?;
            }
            Some(Ok(PayloadItem::Eof)) => {
                source.set_complete();
                return Ok(());
            }
            Some(Err(e)) => {
                source.set_exception(e.clone());
                return Err(e);
            }
            None => {
                let e = BodyError::protocol("connection closed before the body was complete");
                source.set_exception(e.clone());
                return Err(e);
            }
        }
    }
}
