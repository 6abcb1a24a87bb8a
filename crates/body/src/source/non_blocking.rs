use std::fmt;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::{Buf, Bytes};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::buffer::ReadQueue;
use crate::executor::{ExecutionContext, TaskHandle};
use crate::forwarder::BodyForwarder;
use crate::handler::{BodyDataHandler, Listener, Listeners, run_all};
use crate::protocol::{BodyError, BodyHeader};
use crate::sink::BodySink;
use crate::transport::Transport;
use crate::utils::{self, lock};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// The result of [`NonBlockingBodySource::available`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Available {
    /// Bytes buffered right now, `0` if more data is expected
    Data(usize),
    /// The body is complete and everything has been read
    EndOfStream,
}

impl Available {
    #[inline]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Available::EndOfStream)
    }

    /// Buffered bytes, `0` at the end of the stream.
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Available::Data(len) => *len,
            Available::EndOfStream => 0,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct SourceState {
    queue: ReadQueue,
    complete: bool,
    destroyed: bool,
    destroy_reason: Option<String>,
    exception: Option<BodyError>,
    ignore_append_error: bool,

    handler: Option<Arc<dyn BodyDataHandler>>,
    data_appended: bool,
    dispatching: bool,
    call_pending: bool,

    receive_timeout: Option<Duration>,
    last_data_received: Instant,
    bytes_received: u64,
    watchdog: Option<TaskHandle>,

    suspended: bool,
    bom_checked: bool,

    complete_listeners: Listeners,
    destroy_listeners: Listeners,
}

impl SourceState {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            queue: ReadQueue::new(),
            complete: false,
            destroyed: false,
            destroy_reason: None,
            exception: None,
            ignore_append_error: false,
            handler: None,
            data_appended: false,
            dispatching: false,
            call_pending: false,
            receive_timeout: None,
            last_data_received: now,
            bytes_received: 0,
            watchdog: None,
            suspended: false,
            bom_checked: false,
            complete_listeners: Listeners::default(),
            destroy_listeners: Listeners::default(),
        }
    }

    fn pending_exception(&self) -> Option<BodyError> {
        self.exception.as_ref().filter(|e| !e.is_close()).cloned()
    }

    fn terminal_error(&self, id: &str) -> BodyError {
        self.exception.clone().unwrap_or_else(|| {
            let reason = self.destroy_reason.as_deref().unwrap_or("destroyed");
            BodyError::destroyed(format!("{id}: {reason}"))
        })
    }

    fn is_terminal(&self) -> bool {
        self.complete || self.destroyed
    }
}

/// The readable side of a message body, fed as bytes arrive.
///
/// The transport side calls [`append`](Self::append),
/// [`set_complete`](Self::set_complete), [`set_exception`](Self::set_exception)
/// and [`destroy`](Self::destroy). Readers drain the buffered data with the
/// `read_*` methods, which signal [`BodyError::Underflow`] while more data is
/// required, or register a [`BodyDataHandler`] to be told about new data.
///
/// `Receiving` ends in either `Complete` or `Destroyed`. After that no more
/// data is accepted.
pub struct NonBlockingBodySource {
    id: String,
    header: BodyHeader,
    context: ExecutionContext,
    upstream: Option<Arc<dyn Transport>>,
    this: Weak<NonBlockingBodySource>,
    state: Mutex<SourceState>,
}

impl fmt::Debug for NonBlockingBodySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("NonBlockingBodySource")
            .field("id", &self.id)
            .field("size", &state.queue.size())
            .field("complete", &state.complete)
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

impl NonBlockingBodySource {
    pub fn new(header: BodyHeader, context: ExecutionContext) -> Arc<Self> {
        Self::build(header, context, None)
    }

    /// A source receiving from `upstream`, which is paused and resumed by
    /// [`suspend`](Self::suspend) and [`resume`](Self::resume).
    pub fn with_upstream(header: BodyHeader, context: ExecutionContext, upstream: Arc<dyn Transport>) -> Arc<Self> {
        Self::build(header, context, Some(upstream))
    }

    /// A complete source holding the given data.
    pub fn completed(header: BodyHeader, context: ExecutionContext, data: Vec<Bytes>) -> Arc<Self> {
        let source = Self::build(header, context, None);
        {
            let mut state = lock(&source.state);
            for range in data {
                state.bytes_received += range.len() as u64;
                state.queue.append(range);
            }
            state.data_appended = true;
            state.complete = true;
            state.complete_listeners.fire();
        }
        source
    }

    fn build(header: BodyHeader, context: ExecutionContext, upstream: Option<Arc<dyn Transport>>) -> Arc<Self> {
        let receive_timeout = context.config().receive_timeout();
        let source = Arc::new_cyclic(|this| Self {
            id: utils::next_id("source"),
            header,
            context,
            upstream,
            this: Weak::clone(this),
            state: Mutex::new(SourceState::new()),
        });
        if receive_timeout.is_some() {
            source.set_receive_timeout(receive_timeout);
        }
        source
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn header(&self) -> &BodyHeader {
        &self.header
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Stores received data and notifies the data handler.
    ///
    /// Fails once the source is complete or destroyed, unless the source was
    /// destroyed, in which case late data is dropped silently.
    pub fn append(&self, data: Bytes) -> Result<usize, BodyError> {
        let len = data.len();
        {
            let mut state = lock(&self.state);
            if state.is_terminal() {
                if state.ignore_append_error {
                    trace!(id = %self.id, len, "drop data appended after destroy");
                    return Ok(0);
                }
                return Err(BodyError::closed(format!("{} is complete, can not append data", self.id)));
            }

            state.queue.append(data);
            state.bytes_received += len as u64;
            state.last_data_received = Instant::now();
            state.data_appended = true;
        }

        trace!(id = %self.id, len, "append body data");
        self.call_handler(false);
        Ok(len)
    }

    /// Marks the end of the body.
    pub fn set_complete(&self) {
        let (listeners, watchdog, bytes_received) = {
            let mut state = lock(&self.state);
            if state.is_terminal() {
                return;
            }
            state.complete = true;
            (state.complete_listeners.fire(), state.watchdog.take(), state.bytes_received)
        };
        drop(watchdog);

        debug!(id = %self.id, bytes_received, "body complete");
        run_all(listeners, self.context.executor().as_ref());
        self.call_handler(true);
    }

    /// Drops all buffered data and rejects further reads. Idempotent.
    pub fn destroy<S: ToString>(&self, reason: S) {
        let reason = reason.to_string();
        let (listeners, watchdog) = {
            let mut state = lock(&self.state);
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.ignore_append_error = true;
            state.destroy_reason = Some(reason.clone());
            state.queue.clear();
            (state.destroy_listeners.fire(), state.watchdog.take())
        };
        drop(watchdog);

        debug!(id = %self.id, reason = %reason, "destroy body source");
        run_all(listeners, self.context.executor().as_ref());
        self.call_handler(true);
    }

    /// Fails the source. Only the first error is kept, it is replayed to every
    /// later read.
    pub fn set_exception(&self, error: BodyError) {
        {
            let mut state = lock(&self.state);
            if let Some(existing) = &state.exception {
                debug!(id = %self.id, existing = %existing, ignored = %error, "exception already set, ignore");
                return;
            }
            state.exception = Some(error.clone());
        }

        debug!(id = %self.id, error = %error, "body source failed");
        self.call_handler(true);
        self.destroy(error);
    }

    pub fn exception(&self) -> Option<BodyError> {
        lock(&self.state).exception.clone()
    }

    /// Buffered bytes, or the end of the stream. Never blocks.
    pub fn available(&self) -> Result<Available, BodyError> {
        let state = lock(&self.state);
        if let Some(e) = state.pending_exception() {
            return Err(e);
        }

        match state.queue.size() {
            0 if state.complete => Ok(Available::EndOfStream),
            0 if state.destroyed => Err(state.terminal_error(&self.id)),
            size => Ok(Available::Data(size)),
        }
    }

    /// Reads exactly `length` bytes.
    pub fn read_by_length(&self, length: usize) -> Result<Vec<Bytes>, BodyError> {
        self.read_with(|queue| Ok(queue.read_by_length(length)))
    }

    pub fn read_bytes_by_length(&self, length: usize) -> Result<Bytes, BodyError> {
        self.read_by_length(length).map(utils::merge)
    }

    /// Reads up to `delimiter`, which is consumed but not returned.
    ///
    /// Fails with [`BodyError::MaxReadSizeExceeded`] if the delimiter does not
    /// start within the first `max_len` bytes.
    pub fn read_by_delimiter(&self, delimiter: &[u8], max_len: usize) -> Result<Vec<Bytes>, BodyError> {
        self.read_with(|queue| queue.read_by_delimiter(delimiter, max_len))
    }

    pub fn read_bytes_by_delimiter(&self, delimiter: &[u8], max_len: usize) -> Result<Bytes, BodyError> {
        self.read_by_delimiter(delimiter, max_len).map(utils::merge)
    }

    pub fn read_string_by_length(&self, length: usize) -> Result<String, BodyError> {
        let bytes = self.read_bytes_by_length(length)?;
        self.decode(bytes)
    }

    pub fn read_string_by_delimiter(&self, delimiter: &str, max_len: usize) -> Result<String, BodyError> {
        let bytes = self.read_bytes_by_delimiter(delimiter.as_bytes(), max_len)?;
        self.decode(bytes)
    }

    /// Reads everything buffered, possibly nothing.
    pub fn read_available(&self) -> Result<Vec<Bytes>, BodyError> {
        self.read_with(|queue| Ok(Some(queue.read_all())))
    }

    pub fn index_of(&self, delimiter: &[u8]) -> Option<usize> {
        lock(&self.state).queue.index_of(delimiter)
    }

    /// The buffered data, without consuming it.
    pub fn copy_content(&self) -> Vec<Bytes> {
        lock(&self.state).queue.copy_content()
    }

    pub fn mark_read_position(&self) {
        lock(&self.state).queue.mark();
    }

    pub fn reset_to_read_mark(&self) -> bool {
        lock(&self.state).queue.reset_to_mark()
    }

    pub fn remove_read_mark(&self) {
        lock(&self.state).queue.remove_mark();
    }

    /// Changes whenever data is appended.
    pub fn read_version(&self) -> u64 {
        lock(&self.state).queue.version()
    }

    pub fn size(&self) -> usize {
        lock(&self.state).queue.size()
    }

    pub fn bytes_received(&self) -> u64 {
        lock(&self.state).bytes_received
    }

    pub fn is_complete(&self) -> bool {
        lock(&self.state).complete
    }

    pub fn is_destroyed(&self) -> bool {
        lock(&self.state).destroyed
    }

    /// Whether anything can still be read.
    pub fn is_open(&self) -> bool {
        let state = lock(&self.state);
        !state.destroyed && !(state.complete && state.queue.is_empty())
    }

    pub fn is_more_input_expected(&self) -> bool {
        !lock(&self.state).is_terminal()
    }

    /// Replaces the data handler. The new handler is called right away if
    /// anything happened to the source already.
    pub fn set_data_handler(&self, handler: Option<Arc<dyn BodyDataHandler>>) {
        let notify = {
            let mut state = lock(&self.state);
            state.handler = handler;
            state.handler.is_some()
                && (state.data_appended || state.is_terminal() || state.exception.is_some())
        };
        if notify {
            self.call_handler(true);
        }
    }

    /// Removes the data handler, but only if it still is `handler`.
    pub fn remove_data_handler<H: BodyDataHandler + 'static>(&self, handler: &Arc<H>) -> bool {
        let mut state = lock(&self.state);
        let installed = state
            .handler
            .as_ref()
            .is_some_and(|current| std::ptr::addr_eq(Arc::as_ptr(current), Arc::as_ptr(handler)));
        if installed {
            state.handler = None;
        }
        installed
    }

    pub fn data_handler(&self) -> Option<Arc<dyn BodyDataHandler>> {
        lock(&self.state).handler.clone()
    }

    pub fn add_complete_listener(&self, listener: Listener) {
        let late = lock(&self.state).complete_listeners.add(listener);
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

    /// Pauses the upstream transport. Idempotent.
    pub fn suspend(&self) -> Result<(), BodyError> {
        {
            let mut state = lock(&self.state);
            if state.suspended {
                return Ok(());
            }
            state.suspended = true;
        }

        debug!(id = %self.id, "suspend receiving");
        match &self.upstream {
            Some(upstream) => upstream.suspend_receiving(),
            None => Ok(()),
        }
    }

    /// Resumes the upstream transport. Idempotent.
    pub fn resume(&self) -> Result<(), BodyError> {
        {
            let mut state = lock(&self.state);
            if !state.suspended {
                return Ok(());
            }
            state.suspended = false;
        }

        debug!(id = %self.id, "resume receiving");
        match &self.upstream {
            Some(upstream) => upstream.resume_receiving(),
            None => Ok(()),
        }
    }

    pub fn is_suspended(&self) -> bool {
        lock(&self.state).suspended
    }

    pub fn is_network_endpoint(&self) -> bool {
        self.upstream.as_ref().is_some_and(|upstream| upstream.is_network_endpoint())
    }

    pub fn receive_timeout(&self) -> Option<Duration> {
        lock(&self.state).receive_timeout
    }

    /// Sets the receive timeout, `None` waits forever.
    ///
    /// The source fails with [`BodyError::ReceiveTimeout`] once no data has
    /// arrived for the timeout. A zero timeout fails the source at once.
    /// Without a scheduler the timeout is recorded but not watched.
    pub fn set_receive_timeout(&self, timeout: Option<Duration>) {
        let previous = {
            let mut state = lock(&self.state);
            state.receive_timeout = timeout;
            state.watchdog.take()
        };
        drop(previous);

        let Some(timeout) = timeout else {
            return;
        };
        if timeout.is_zero() {
            self.set_exception(BodyError::receive_timeout(timeout));
            return;
        }
        let Some(scheduler) = self.context.scheduler() else {
            debug!(id = %self.id, ?timeout, "no scheduler, receive timeout is not watched");
            return;
        };

        let this = Weak::clone(&self.this);
        let watchdog = scheduler.schedule_periodic(
            watchdog_period(timeout),
            Box::new(move || match this.upgrade() {
                Some(source) => source.check_receive_timeout(Instant::now()),
                None => ControlFlow::Break(()),
            }),
        );

        let mut state = lock(&self.state);
        if !state.is_terminal() {
            state.watchdog = Some(watchdog);
        }
    }

    pub(crate) fn check_receive_timeout(&self, now: Instant) -> ControlFlow<()> {
        let timeout = {
            let state = lock(&self.state);
            if state.is_terminal() {
                return ControlFlow::Break(());
            }
            let Some(timeout) = state.receive_timeout else {
                return ControlFlow::Break(());
            };
            if now <= state.last_data_received + timeout {
                return ControlFlow::Continue(());
            }
            timeout
        };

        debug!(id = %self.id, ?timeout, "receive timeout reached");
        self.set_exception(BodyError::receive_timeout(timeout));
        ControlFlow::Break(())
    }

    /// Pumps this body into `sink` until the end of the body.
    pub fn forward_to(&self, sink: Arc<BodySink>) -> Result<Arc<BodyForwarder>, BodyError> {
        let this = self.this.upgrade().ok_or_else(|| BodyError::destroyed("source is gone"))?;
        Ok(BodyForwarder::start(this, sink))
    }

    fn read_with<T, F>(&self, read: F) -> Result<T, BodyError>
    where
        F: FnOnce(&mut ReadQueue) -> Result<Option<T>, BodyError>,
    {
        let mut state = lock(&self.state);
        if let Some(e) = state.pending_exception() {
            return Err(e);
        }
        if state.destroyed {
            return Err(state.terminal_error(&self.id));
        }

        match read(&mut state.queue)? {
            Some(data) => Ok(data),
            None if state.complete => {
                Err(BodyError::closed(format!("end of body reached, {} bytes left", state.queue.size())))
            }
            None => Err(BodyError::Underflow),
        }
    }

    fn decode(&self, mut bytes: Bytes) -> Result<String, BodyError> {
        let charset = self.header.charset();
        match charset.as_str() {
            "utf-8" | "utf8" | "us-ascii" => {
                let first_read = !std::mem::replace(&mut lock(&self.state).bom_checked, true);
                if first_read && bytes.starts_with(UTF8_BOM) {
                    bytes.advance(UTF8_BOM.len());
                }
                String::from_utf8(bytes.to_vec()).map_err(|e| BodyError::protocol(format!("invalid utf-8 body: {e}")))
            }
            "iso-8859-1" | "latin1" => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            other => Err(BodyError::protocol(format!("unsupported charset {other}"))),
        }
    }

    fn call_handler(&self, forced: bool) {
        let Some(this) = self.this.upgrade() else {
            return;
        };

        let mode = {
            let mut state = lock(&self.state);
            let Some(handler) = state.handler.as_ref() else {
                return;
            };
            if !forced && state.queue.is_empty() && state.exception.is_none() {
                return;
            }
            if state.dispatching {
                state.call_pending = true;
                return;
            }
            let mode = handler.execution_mode();
            state.dispatching = true;
            mode
        };

        self.context.executor().execute(mode, Box::new(move || this.run_handler()));
    }

    fn run_handler(&self) {
        loop {
            let handler = {
                let mut state = lock(&self.state);
                state.call_pending = false;
                state.handler.clone()
            };

            if let Some(handler) = handler {
                if let Err(e) = handler.on_data(self) {
                    debug!(id = %self.id, error = %e, "data handler failed");
                    self.set_exception(e);
                }
            }

            let mut state = lock(&self.state);
            if !state.call_pending {
                state.dispatching = false;
                return;
            }
        }
    }
}

fn watchdog_period(timeout: Duration) -> Duration {
    if timeout <= Duration::from_secs(1) {
        Duration::from_millis(100)
    } else {
        (timeout / 10).min(Duration::from_secs(10))
    }
}
