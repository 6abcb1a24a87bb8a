//! Pumps a body source into a body sink.
//!
//! A [`BodyForwarder`] registers itself as the data handler of the source and
//! writes everything that arrives to the sink. At the end of the stream it
//! detaches and closes the sink. Failures on either side destroy both ends.
//!
//! When both ends are network endpoints and the sink flushes asynchronously,
//! the forwarder applies flow control: the source is suspended while more than
//! the autosuspend threshold is waiting to be written, and resumed once the
//! sink has caught up.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use tracing::{debug, trace};

use crate::executor::ExecutionMode;
use crate::handler::{BodyDataHandler, Listener, WriteCompletionHandler};
use crate::protocol::BodyError;
use crate::sink::{BodySink, FlushMode};
use crate::source::{Available, NonBlockingBodySource};
use crate::utils;

/// Extension points of a [`BodyForwarder`].
pub trait ForwardHooks: Send + Sync {
    /// Reads the next data to forward. Returning nothing without reading
    /// anything stops the current pumping round.
    fn on_data(&self, source: &NonBlockingBodySource) -> Result<Vec<Bytes>, BodyError> {
        source.read_available()
    }

    /// The source reached its end, called before the sink is closed.
    fn on_complete(&self) {}

    /// Forwarding failed, called before both ends are destroyed.
    fn on_exception(&self, _error: &BodyError) {}
}

/// Forwards the data unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainForward;

impl ForwardHooks for PlainForward {}

pub struct BodyForwarder {
    id: String,
    source: Arc<NonBlockingBodySource>,
    sink: Arc<BodySink>,
    hooks: Arc<dyn ForwardHooks>,
    mode: ExecutionMode,
    flow_control: Option<usize>,
    finished: AtomicBool,
    this: Weak<BodyForwarder>,
}

impl fmt::Debug for BodyForwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyForwarder")
            .field("id", &self.id)
            .field("source", &self.source.id())
            .field("sink", &self.sink.id())
            .field("flow_control", &self.flow_control)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl BodyForwarder {
    pub fn start(source: Arc<NonBlockingBodySource>, sink: Arc<BodySink>) -> Arc<Self> {
        Self::start_with_hooks(source, sink, Arc::new(PlainForward))
    }

    pub fn start_with_hooks(
        source: Arc<NonBlockingBodySource>,
        sink: Arc<BodySink>,
        hooks: Arc<dyn ForwardHooks>,
    ) -> Arc<Self> {
        let async_flush = sink.flush_mode() == FlushMode::Async;
        let mode = if async_flush { ExecutionMode::NonThreaded } else { ExecutionMode::MultiThreaded };

        let config = sink.context().config();
        let flow_control = (async_flush
            && config.is_autosuspend_enabled()
            && source.is_network_endpoint()
            && sink.is_network_endpoint())
        .then(|| config.autosuspend_threshold());

        let forwarder = Arc::new_cyclic(|this| Self {
            id: utils::next_id("forwarder"),
            source: Arc::clone(&source),
            sink: Arc::clone(&sink),
            hooks,
            mode,
            flow_control,
            finished: AtomicBool::new(false),
            this: Weak::clone(this),
        });
        debug!(id = %forwarder.id, source = %source.id(), sink = %sink.id(), ?flow_control, "start forwarding");

        let weak_sink = Arc::downgrade(&sink);
        source.add_destroy_listener(Listener::new(ExecutionMode::Unsynchronized, move || {
            if let Some(sink) = weak_sink.upgrade() {
                sink.destroy("forwarded source destroyed", false);
            }
        }));
        let weak_source = Arc::downgrade(&source);
        sink.add_destroy_listener(Listener::new(ExecutionMode::Unsynchronized, move || {
            if let Some(source) = weak_source.upgrade() {
                source.destroy("forwarding sink destroyed");
            }
        }));

        source.set_data_handler(Some(Arc::clone(&forwarder) as Arc<dyn BodyDataHandler>));
        forwarder
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &Arc<NonBlockingBodySource> {
        &self.source
    }

    pub fn sink(&self) -> &Arc<BodySink> {
        &self.sink
    }

    pub fn is_flow_controlled(&self) -> bool {
        self.flow_control.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn pump(&self, source: &NonBlockingBodySource) -> Result<(), BodyError> {
        loop {
            match source.available()? {
                Available::EndOfStream => return self.finish(),
                Available::Data(0) => return Ok(()),
                Available::Data(_) => {}
            }

            let version = source.read_version();
            let data = self.hooks.on_data(source)?;
            if data.is_empty() {
                if source.read_version() == version {
                    trace!(id = %self.id, "nothing consumed, wait for more data");
                    return Ok(());
                }
                continue;
            }
            self.write(data)?;
        }
    }

    fn write(&self, data: Vec<Bytes>) -> Result<usize, BodyError> {
        let Some(threshold) = self.flow_control else {
            return self.sink.write_all(data);
        };

        let len = utils::remaining(&data);
        let pending = self.sink.pending_write_size();
        if pending + len > threshold {
            trace!(id = %self.id, pending, len, threshold, "too much data pending, suspend source");
            self.source.suspend()?;
        }

        let completion = Arc::new(ResumeOnWritten { forwarder: Weak::clone(&self.this), threshold });
        self.sink.write_with_completion(data, completion)
    }

    fn finish(&self) -> Result<(), BodyError> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.source.set_data_handler(None);
        self.hooks.on_complete();
        match self.sink.close() {
            Ok(()) => {
                debug!(id = %self.id, written = self.sink.written(), "forwarding complete");
                Ok(())
            }
            Err(e) => {
                self.teardown(&e);
                Ok(())
            }
        }
    }

    fn fail(&self, error: &BodyError) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.source.set_data_handler(None);
        self.teardown(error);
    }

    fn teardown(&self, error: &BodyError) {
        debug!(id = %self.id, error = %error, "forwarding failed");
        self.hooks.on_exception(error);
        self.source.destroy(error);
        self.sink.destroy(error, false);
    }

    fn resume_if_drained(&self, threshold: usize) {
        if self.sink.pending_write_size() > threshold {
            return;
        }
        if let Err(e) = self.source.resume() {
            self.fail(&e);
        }
    }
}

impl BodyDataHandler for BodyForwarder {
    fn on_data(&self, source: &NonBlockingBodySource) -> Result<(), BodyError> {
        if self.is_finished() {
            return Ok(());
        }
        if let Err(e) = self.pump(source) {
            self.fail(&e);
        }
        Ok(())
    }

    fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }
}

struct ResumeOnWritten {
    forwarder: Weak<BodyForwarder>,
    threshold: usize,
}

impl WriteCompletionHandler for ResumeOnWritten {
    fn on_written(&self, _written: usize) {
        if let Some(forwarder) = self.forwarder.upgrade() {
            forwarder.resume_if_drained(self.threshold);
        }
    }

    fn on_exception(&self, error: &BodyError) {
        if let Some(forwarder) = self.forwarder.upgrade() {
            if let Err(e) = forwarder.source.resume() {
                debug!(id = %forwarder.id, error = %e, "can not resume source after failed write");
            }
            forwarder.fail(error);
        }
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Unsynchronized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BodyConfig;
    use crate::executor::{ExecutionContext, InlineExecutor};
    use crate::protocol::{BodyHeader, PayloadSize};
    use crate::transport::{MemoryTransport, MockTransport, Transport};
    use std::sync::Mutex;

    fn context(config: BodyConfig) -> ExecutionContext {
        ExecutionContext::new(Arc::new(InlineExecutor), None, config)
    }

    #[test]
    fn forwards_until_end_of_stream() {
        let source = NonBlockingBodySource::new(BodyHeader::default(), context(BodyConfig::default()));
        let transport = Arc::new(MemoryTransport::new());
        let sink = BodySink::new(
            BodyHeader::new(None, PayloadSize::Chunked),
            Arc::clone(&transport) as Arc<dyn Transport>,
            context(BodyConfig::default()),
        );

        source.append(Bytes::from_static(b"early")).unwrap();
        let forwarder = source.forward_to(Arc::clone(&sink)).unwrap();
        assert!(!forwarder.is_flow_controlled());

        source.append(Bytes::from_static(b" late")).unwrap();
        source.set_complete();

        assert!(forwarder.is_finished());
        assert!(source.data_handler().is_none());
        assert!(!sink.is_open());
        assert_eq!(&transport.written()[..], b"5\r\nearly\r\n5\r\n late\r\n0\r\n\r\n");
    }

    #[test]
    fn destroyed_sink_destroys_source() {
        let source = NonBlockingBodySource::new(BodyHeader::default(), context(BodyConfig::default()));
        let (sink, _transport) = BodySink::in_memory(context(BodyConfig::default()));
        let _forwarder = BodyForwarder::start(Arc::clone(&source), Arc::clone(&sink));

        sink.destroy("client gone", true);
        assert!(source.is_destroyed());
        assert_eq!(source.append(Bytes::from_static(b"dropped")).unwrap(), 0);
    }

    #[test]
    fn source_failure_destroys_sink() {
        let source = NonBlockingBodySource::new(BodyHeader::default(), context(BodyConfig::default()));
        let (sink, _transport) = BodySink::in_memory(context(BodyConfig::default()));

        #[derive(Default)]
        struct Recording(Mutex<Vec<String>>);

        impl ForwardHooks for Recording {
            fn on_exception(&self, error: &BodyError) {
                self.0.lock().unwrap().push(error.to_string());
            }
        }

        let hooks = Arc::new(Recording::default());
        let forwarder = BodyForwarder::start_with_hooks(Arc::clone(&source), Arc::clone(&sink), Arc::clone(&hooks) as Arc<dyn ForwardHooks>);
        source.set_exception(BodyError::protocol("bad chunk"));

        assert!(forwarder.is_finished());
        assert!(sink.is_destroyed());
        assert_eq!(hooks.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn flow_control_suspends_once_and_resumes_once() {
        let config = BodyConfig::default().with_autosuspend_threshold(4);

        let mut upstream = MockTransport::new();
        upstream.expect_is_network_endpoint().return_const(true);
        upstream.expect_suspend_receiving().times(1).returning(|| Ok(()));
        upstream.expect_resume_receiving().times(1).returning(|| Ok(()));
        let source = NonBlockingBodySource::with_upstream(BodyHeader::default(), context(config.clone()), Arc::new(upstream));

        let transport = Arc::new(MemoryTransport::manual().as_network_endpoint());
        let sink = BodySink::new(BodyHeader::new(None, PayloadSize::CloseDelimited), Arc::clone(&transport) as Arc<dyn Transport>, context(config));
        sink.set_flush_mode(FlushMode::Async);

        let forwarder = source.forward_to(Arc::clone(&sink)).unwrap();
        assert!(forwarder.is_flow_controlled());

        source.append(Bytes::from_static(b"abc")).unwrap();
        assert!(!source.is_suspended());
        source.append(Bytes::from_static(b"def")).unwrap();
        assert!(source.is_suspended());
        source.append(Bytes::from_static(b"ghi")).unwrap();
        assert_eq!(sink.pending_write_size(), 9);

        transport.complete_pending();
        assert!(!source.is_suspended());
        assert_eq!(&transport.written()[..], b"abcdefghi");
        assert_eq!(sink.written(), 9);
    }

    #[test]
    fn failed_write_tears_down_even_if_resume_fails() {
        let config = BodyConfig::default().with_autosuspend_threshold(4);

        let mut upstream = MockTransport::new();
        upstream.expect_is_network_endpoint().return_const(true);
        upstream.expect_suspend_receiving().times(1).returning(|| Ok(()));
        upstream
            .expect_resume_receiving()
            .times(1..)
            .returning(|| Err(BodyError::protocol("upstream already gone")));
        let source = NonBlockingBodySource::with_upstream(BodyHeader::default(), context(config.clone()), Arc::new(upstream));

        let transport = Arc::new(MemoryTransport::manual().as_network_endpoint());
        let sink = BodySink::new(
            BodyHeader::new(None, PayloadSize::CloseDelimited),
            Arc::clone(&transport) as Arc<dyn Transport>,
            context(config),
        );
        sink.set_flush_mode(FlushMode::Async);

        let forwarder = source.forward_to(Arc::clone(&sink)).unwrap();
        source.append(Bytes::from_static(b"abcdef")).unwrap();
        assert!(source.is_suspended());

        transport.fail_pending(BodyError::protocol("connection reset"));

        assert!(forwarder.is_finished());
        assert!(!source.is_suspended());
        assert!(source.is_destroyed());
        assert!(sink.is_destroyed());
    }

    #[test]
    fn declining_hook_does_not_spin() {
        struct Declining;

        impl ForwardHooks for Declining {
            fn on_data(&self, _source: &NonBlockingBodySource) -> Result<Vec<Bytes>, BodyError> {
                Ok(Vec::new())
            }
        }

        let source = NonBlockingBodySource::new(BodyHeader::default(), context(BodyConfig::default()));
        let (sink, transport) = BodySink::in_memory(context(BodyConfig::default()));
        let forwarder = BodyForwarder::start_with_hooks(Arc::clone(&source), sink, Arc::new(Declining));

        source.append(Bytes::from_static(b"kept")).unwrap();
        assert!(!forwarder.is_finished());
        assert_eq!(source.size(), 4);
        assert!(transport.written().is_empty());
    }
}
