use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::buffer::WriteQueue;
use crate::codec::PayloadEncoder;
use crate::executor::ExecutionContext;
use crate::handler::{Listener, Listeners, WriteCompletionHandler, run_all};
use crate::protocol::{BodyError, BodyHeader, PayloadSize};
use crate::sink::completion::FlushCompletion;
use crate::transport::{MemoryTransport, Transport};
use crate::utils::{self, lock};

/// How [`BodySink::flush`] hands data to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// wait until the transport has written the data, bounded by the send timeout
    #[default]
    Sync,
    /// return once the transport has accepted the data
    Async,
}

struct SinkState {
    queue: WriteQueue,
    callers: Vec<Arc<dyn WriteCompletionHandler>>,
    autoflush: bool,
    flush_mode: FlushMode,
    send_timeout: Duration,
    encoder: PayloadEncoder,
    eof_written: bool,
    close_listeners: Listeners,
    destroy_listeners: Listeners,
}

/// The writable side of a message body.
///
/// Written data is buffered in a [`WriteQueue`] and handed to the transport,
/// framed for the message, on flush. With autoflush, the default, every write
/// flushes. Once closed or destroyed, writes fail, unless write errors are
/// ignored, in which case they are counted and dropped.
pub struct BodySink {
    id: String,
    header: BodyHeader,
    transport: Arc<dyn Transport>,
    context: ExecutionContext,
    this: Weak<BodySink>,
    state: Mutex<SinkState>,
    flush_lock: Mutex<()>,

    open: AtomicBool,
    destroyed: AtomicBool,
    ignore_write_error: AtomicBool,
    written: AtomicU64,
    ignored_error_bytes: AtomicU64,
}

impl fmt::Debug for BodySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodySink")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .field("destroyed", &self.is_destroyed())
            .field("written", &self.written())
            .finish()
    }
}

impl BodySink {
    pub fn new(header: BodyHeader, transport: Arc<dyn Transport>, context: ExecutionContext) -> Arc<Self> {
        let state = SinkState {
            queue: WriteQueue::new(),
            callers: Vec::new(),
            autoflush: true,
            flush_mode: FlushMode::default(),
            send_timeout: context.config().send_timeout(),
            encoder: PayloadEncoder::for_size(header.payload_size()),
            eof_written: false,
            close_listeners: Listeners::default(),
            destroy_listeners: Listeners::default(),
        };

        Arc::new_cyclic(|this| Self {
            id: utils::next_id("sink"),
            header,
            transport,
            context,
            this: Weak::clone(this),
            state: Mutex::new(state),
            flush_lock: Mutex::new(()),
            open: AtomicBool::new(true),
            destroyed: AtomicBool::new(false),
            ignore_write_error: AtomicBool::new(false),
            written: AtomicU64::new(0),
            ignored_error_bytes: AtomicU64::new(0),
        })
    }

    /// A sink writing unframed data into memory.
    pub fn in_memory(context: ExecutionContext) -> (Arc<Self>, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let header = BodyHeader::new(None, PayloadSize::CloseDelimited);
        (Self::new(header, Arc::clone(&transport) as Arc<dyn Transport>, context), transport)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn header(&self) -> &BodyHeader {
        &self.header
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn write(&self, data: Bytes) -> Result<usize, BodyError> {
        self.write_all(vec![data])
    }

    pub fn write_str(&self, data: &str) -> Result<usize, BodyError> {
        self.write(Bytes::copy_from_slice(data.as_bytes()))
    }

    pub fn write_all(&self, data: Vec<Bytes>) -> Result<usize, BodyError> {
        let len = utils::remaining(&data);
        if !self.is_open() {
            return self.write_on_closed(len, None);
        }

        let autoflush = {
            let mut state = lock(&self.state);
            state.queue.append_all(data);
            state.autoflush
        };
        trace!(id = %self.id, len, "write body data");

        if autoflush {
            self.flush()?;
        }
        Ok(len)
    }

    /// Writes and flushes `data`. `completion` is notified once the data has
    /// been written by the transport.
    pub fn write_with_completion(
        &self,
        data: Vec<Bytes>,
        completion: Arc<dyn WriteCompletionHandler>,
    ) -> Result<usize, BodyError> {
        let len = utils::remaining(&data);
        if !self.is_open() {
            return self.write_on_closed(len, Some(completion));
        }

        {
            let mut state = lock(&self.state);
            state.queue.append_all(data);
            state.callers.push(completion);
        }
        self.flush()?;
        Ok(len)
    }

    fn write_on_closed(&self, len: usize, completion: Option<Arc<dyn WriteCompletionHandler>>) -> Result<usize, BodyError> {
        if !self.is_ignore_write_error() {
            return Err(BodyError::closed(format!("{} is closed", self.id)));
        }

        trace!(id = %self.id, len, "drop data written to closed sink");
        self.record_ignored(len);
        if let Some(completion) = completion {
            let mode = completion.execution_mode();
            self.context.executor().execute(mode, Box::new(move || completion.on_written(len)));
        }
        Ok(len)
    }

    /// Hands the buffered data to the transport.
    ///
    /// Any write mark is removed first. In [`FlushMode::Sync`] this waits
    /// until the data has been written, failing with
    /// [`BodyError::SendTimeout`] once the send timeout has passed.
    pub fn flush(&self) -> Result<(), BodyError> {
        self.flush_data(false)
    }

    fn flush_data(&self, eof: bool) -> Result<(), BodyError> {
        if self.is_destroyed() {
            return if self.is_ignore_write_error() {
                Ok(())
            } else {
                Err(BodyError::destroyed(format!("{} is destroyed", self.id)))
            };
        }

        let (completion, flush_mode, send_timeout) = {
            let _flushing = lock(&self.flush_lock);

            let mut state = lock(&self.state);
            state.queue.remove_mark();
            let drained = state.queue.drain();
            let callers = std::mem::take(&mut state.callers);
            let write_eof = eof && !state.eof_written;
            if drained.is_empty() && callers.is_empty() && !write_eof {
                return Ok(());
            }

            let payload_len = utils::remaining(&drained);
            let flush_mode = state.flush_mode;
            let send_timeout = state.send_timeout;
            let encoded = state.encoder.encode_all(drained, write_eof);
            if write_eof && encoded.is_ok() {
                state.eof_written = true;
            }
            drop(state);

            let completion =
                Arc::new(FlushCompletion::new(Weak::clone(&self.this), payload_len, callers, flush_mode == FlushMode::Sync));
            let encoded = match encoded {
                Ok(encoded) => encoded,
                Err(e) => {
                    completion.release();
                    completion.complete(Err(e.clone()));
                    return self.write_result(e);
                }
            };

            if flush_mode == FlushMode::Sync
                && self.context.executor().is_dispatch_thread()
                && !self.context.config().suppress_sync_flush_warning()
            {
                warn!(id = %self.id, "sync flush on the dispatcher may block it, use the async flush mode");
            }

            let data = if encoded.is_empty() { Vec::new() } else { vec![encoded] };
            if let Err(e) = self.transport.write(data, Some(Arc::clone(&completion) as Arc<dyn WriteCompletionHandler>)) {
                completion.release();
                completion.complete(Err(e.clone()));
                return self.write_result(e);
            }
            (completion, flush_mode, send_timeout)
        };

        completion.release();
        match flush_mode {
            FlushMode::Sync => completion.wait(send_timeout),
            FlushMode::Async => Ok(()),
        }
    }

    fn write_result(&self, error: BodyError) -> Result<(), BodyError> {
        if self.is_ignore_write_error() {
            Ok(())
        } else {
            debug!(id = %self.id, error = %error, "flush failed");
            Err(error)
        }
    }

    /// Flushes the remaining data, writes the body terminator and fires the
    /// close listeners. Idempotent.
    pub fn close(&self) -> Result<(), BodyError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let result = self.flush_data(true).and_then(|_| {
            if self.header.payload_size().is_close_delimited() { self.transport.close() } else { Ok(()) }
        });
        if let Err(e) = result {
            if !self.is_ignore_write_error() {
                debug!(id = %self.id, error = %e, "closing body sink failed");
                return Err(e);
            }
            debug!(id = %self.id, error = %e, "ignore error while closing body sink");
        }

        let listeners = lock(&self.state).close_listeners.fire();
        debug!(id = %self.id, written = self.written(), "body sink closed");
        run_all(listeners, self.context.executor().as_ref());
        Ok(())
    }

    /// Drops buffered data and fires the destroy listeners. Idempotent.
    pub fn destroy<S: ToString>(&self, reason: S, ignore_write_error: bool) {
        if ignore_write_error {
            self.set_ignore_write_error();
        }
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.open.store(false, Ordering::SeqCst);

        let listeners = {
            let mut state = lock(&self.state);
            state.queue.remove_mark();
            state.queue.drain();
            state.callers.clear();
            state.destroy_listeners.fire()
        };

        debug!(id = %self.id, reason = %reason.to_string(), "destroy body sink");
        run_all(listeners, self.context.executor().as_ref());
    }

    /// From now on write errors are counted and dropped.
    pub fn set_ignore_write_error(&self) {
        self.ignore_write_error.store(true, Ordering::SeqCst);
    }

    pub fn is_ignore_write_error(&self) -> bool {
        self.ignore_write_error.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Payload bytes the transport has acknowledged as written.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }

    /// Payload bytes dropped because write errors are ignored.
    pub fn ignored_error_bytes(&self) -> u64 {
        self.ignored_error_bytes.load(Ordering::SeqCst)
    }

    pub(crate) fn record_written(&self, len: usize) {
        self.written.fetch_add(len as u64, Ordering::SeqCst);
    }

    pub(crate) fn record_ignored(&self, len: usize) {
        self.ignored_error_bytes.fetch_add(len as u64, Ordering::SeqCst);
    }

    /// Buffered bytes plus bytes the transport has not written yet.
    pub fn pending_write_size(&self) -> usize {
        lock(&self.state).queue.len() + self.transport.pending_write_size()
    }

    pub fn is_flushed(&self) -> bool {
        lock(&self.state).queue.is_empty() && self.transport.pending_write_size() == 0
    }

    pub fn set_autoflush(&self, autoflush: bool) {
        lock(&self.state).autoflush = autoflush;
    }

    pub fn is_autoflush(&self) -> bool {
        lock(&self.state).autoflush
    }

    pub fn set_flush_mode(&self, flush_mode: FlushMode) {
        lock(&self.state).flush_mode = flush_mode;
    }

    pub fn flush_mode(&self) -> FlushMode {
        lock(&self.state).flush_mode
    }

    pub fn set_send_timeout(&self, send_timeout: Duration) {
        lock(&self.state).send_timeout = send_timeout;
    }

    pub fn send_timeout(&self) -> Duration {
        lock(&self.state).send_timeout
    }

    /// Marks the write position, autoflush should be off while a mark is used.
    pub fn mark_write_position(&self) {
        lock(&self.state).queue.mark_position();
    }

    pub fn reset_to_write_mark(&self) -> bool {
        lock(&self.state).queue.reset_to_mark()
    }

    pub fn remove_write_mark(&self) {
        lock(&self.state).queue.remove_mark();
    }

    pub fn is_network_endpoint(&self) -> bool {
        self.transport.is_network_endpoint()
    }

    pub fn add_close_listener(&self, listener: Listener) {
        let late = lock(&self.state).close_listeners.add(listener);
        if let Some(listener) = late {
            listener.run(self.context.executor().as_ref());
        }
    }

    pub fn add_destroy_listener(&self, listener: Listener) {
        let late = lock(&self.state).destroy_listeners.add(listener);
        if let Some(listener) = late {
            listener.run(self.context.executor().as_ref());
        }
    }
}

impl io::Write for &BodySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        BodySink::write(*self, Bytes::copy_from_slice(buf)).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        BodySink::flush(*self).map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BodyConfig;
    use crate::executor::{ExecutionMode, InlineExecutor};
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;

    fn context() -> ExecutionContext {
        ExecutionContext::new(Arc::new(InlineExecutor), None, BodyConfig::default())
    }

    fn sink_with(payload_size: PayloadSize, transport: Arc<MemoryTransport>) -> Arc<BodySink> {
        BodySink::new(BodyHeader::new(None, payload_size), transport, context())
    }

    #[derive(Default)]
    struct Recording {
        written: AtomicUsize,
        failed: AtomicUsize,
    }

    impl WriteCompletionHandler for Recording {
        fn on_written(&self, written: usize) {
            self.written.fetch_add(written, Ordering::SeqCst);
        }

        fn on_exception(&self, _error: &BodyError) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }

        fn execution_mode(&self) -> ExecutionMode {
            ExecutionMode::Unsynchronized
        }
    }

    #[test]
    fn autoflush_writes_through() {
        let (sink, transport) = BodySink::in_memory(context());
        sink.write_str("hello ").unwrap();
        sink.write_str("world").unwrap();

        assert_eq!(&transport.written()[..], b"hello world");
        assert_eq!(sink.written(), 11);
        assert!(sink.is_flushed());
    }

    #[test]
    fn chunked_body_is_terminated_on_close() {
        let transport = Arc::new(MemoryTransport::new());
        let sink = sink_with(PayloadSize::Chunked, Arc::clone(&transport));

        let closed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closed);
        sink.add_close_listener(Listener::new(ExecutionMode::Unsynchronized, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        sink.set_autoflush(false);
        sink.write_str("abc").unwrap();
        assert!(transport.written().is_empty());
        sink.close().unwrap();
        sink.close().unwrap();

        assert_eq!(&transport.written()[..], b"3\r\nabc\r\n0\r\n\r\n");
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(matches!(sink.write_str("late"), Err(BodyError::Closed { .. })));
    }

    #[test]
    fn short_content_length_fails_close() {
        let transport = Arc::new(MemoryTransport::new());
        let sink = sink_with(PayloadSize::Length(10), transport);
        sink.write_str("short").unwrap();
        assert!(matches!(sink.close(), Err(BodyError::Protocol { .. })));
    }

    #[test]
    fn sync_flush_times_out() {
        let transport = Arc::new(MemoryTransport::manual());
        let sink = sink_with(PayloadSize::CloseDelimited, Arc::clone(&transport));
        sink.set_send_timeout(Duration::from_millis(50));

        match sink.write_str("hello") {
            Err(BodyError::SendTimeout { timeout }) => assert_eq!(timeout, Duration::from_millis(50)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(sink.written(), 0);
        assert_eq!(sink.pending_write_size(), 5);
        assert!(sink.is_open());

        transport.complete_pending();
        assert_eq!(sink.written(), 5);
    }

    #[test]
    fn async_flush_notifies_completion() {
        let transport = Arc::new(MemoryTransport::manual());
        let sink = sink_with(PayloadSize::CloseDelimited, Arc::clone(&transport));
        sink.set_flush_mode(FlushMode::Async);

        let recording = Arc::new(Recording::default());
        sink.write_with_completion(vec![Bytes::from_static(b"abcd")], Arc::clone(&recording) as Arc<dyn WriteCompletionHandler>).unwrap();
        assert_eq!(recording.written.load(Ordering::SeqCst), 0);
        assert_eq!(sink.pending_write_size(), 4);

        transport.complete_pending();
        assert_eq!(recording.written.load(Ordering::SeqCst), 4);
        assert_eq!(sink.written(), 4);
    }

    #[test]
    fn ignored_write_errors_are_counted() {
        let transport = Arc::new(MemoryTransport::manual());
        let sink = sink_with(PayloadSize::CloseDelimited, Arc::clone(&transport));
        sink.set_flush_mode(FlushMode::Async);

        let recording = Arc::new(Recording::default());
        sink.write_with_completion(vec![Bytes::from_static(b"abc")], Arc::clone(&recording) as Arc<dyn WriteCompletionHandler>).unwrap();
        sink.set_ignore_write_error();
        transport.fail_pending(BodyError::closed("connection reset"));

        assert_eq!(recording.written.load(Ordering::SeqCst), 3);
        assert_eq!(recording.failed.load(Ordering::SeqCst), 0);
        assert_eq!(sink.ignored_error_bytes(), 3);
        assert_eq!(sink.written(), 0);
    }

    #[test]
    fn failed_async_write_reaches_completion() {
        let transport = Arc::new(MemoryTransport::manual());
        let sink = sink_with(PayloadSize::CloseDelimited, Arc::clone(&transport));
        sink.set_flush_mode(FlushMode::Async);

        let recording = Arc::new(Recording::default());
        sink.write_with_completion(vec![Bytes::from_static(b"abc")], Arc::clone(&recording) as Arc<dyn WriteCompletionHandler>).unwrap();
        transport.fail_pending(BodyError::closed("connection reset"));

        assert_eq!(recording.failed.load(Ordering::SeqCst), 1);
        assert_eq!(sink.written(), 0);
    }

    #[test]
    fn rewrite_at_mark() {
        let (sink, transport) = BodySink::in_memory(context());
        sink.set_autoflush(false);
        sink.write_str("header:").unwrap();
        sink.mark_write_position();
        sink.write_str("????").unwrap();

        assert!(sink.reset_to_write_mark());
        sink.write_str("0042").unwrap();
        sink.flush().unwrap();

        assert_eq!(&transport.written()[..], b"header:0042");
    }

    #[test]
    fn destroy_fires_listeners_once() {
        let (sink, _transport) = BodySink::in_memory(context());
        let destroyed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&destroyed);
        sink.add_destroy_listener(Listener::new(ExecutionMode::Unsynchronized, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        sink.destroy("peer gone", false);
        sink.destroy("again", false);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(sink.write_str("x").is_err());

        sink.destroy("abandoned", true);
        assert_eq!(sink.write_str("xyz").unwrap(), 3);
        assert_eq!(sink.ignored_error_bytes(), 3);
    }

    #[test]
    fn io_write() {
        let (sink, transport) = BodySink::in_memory(context());
        let mut writer = sink.as_ref();
        write!(writer, "{}-{}", 1, 2).unwrap();
        writer.flush().unwrap();
        assert_eq!(&transport.written()[..], b"1-2");
    }
}
