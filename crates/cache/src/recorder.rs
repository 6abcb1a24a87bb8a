//! Caching a response while its body streams through.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Request, Response, StatusCode, Version};
use micro_body::forwarder::{BodyForwarder, ForwardHooks};
use micro_body::protocol::BodyError;
use micro_body::sink::BodySink;
use micro_body::source::NonBlockingBodySource;
use tracing::debug;

use crate::cache::ResponseCache;
use crate::cacheability::is_response_cacheable;
use crate::entry::CachedRequest;
use crate::headers;

/// Tees a forwarded response body into the cache.
///
/// The body is copied as it passes to the sink and the entry is registered
/// once the source completes. Bodies growing beyond the maximum entry size
/// are forwarded but not recorded.
#[derive(Debug)]
pub struct CacheRecorder {
    cache: Arc<ResponseCache>,
    request: CachedRequest,
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    network_latency: Duration,
    body: Mutex<Vec<Bytes>>,
    recorded: AtomicUsize,
    abandoned: AtomicBool,
}

impl CacheRecorder {
    /// Returns `None` if the response head is not cacheable.
    pub fn new<B>(
        cache: Arc<ResponseCache>,
        request: &Request<Bytes>,
        response: &Response<B>,
        network_latency: Duration,
    ) -> Option<Self> {
        if !is_response_cacheable(response, cache.is_shared(), SystemTime::now()) {
            return None;
        }
        Some(Self {
            cache,
            request: CachedRequest::from_request(request),
            status: response.status(),
            version: response.version(),
            headers: headers::cacheable_copy(response.headers()),
            network_latency,
            body: Mutex::new(Vec::new()),
            recorded: AtomicUsize::new(0),
            abandoned: AtomicBool::new(false),
        })
    }

    /// Forwards `source` to `sink`, recording the body on the way.
    pub fn start(self, source: Arc<NonBlockingBodySource>, sink: Arc<BodySink>) -> Arc<BodyForwarder> {
        BodyForwarder::start_with_hooks(source, sink, Arc::new(self))
    }

    fn record(&self, data: &[Bytes]) {
        if self.abandoned.load(Ordering::SeqCst) {
            return;
        }

        let len: usize = data.iter().map(Bytes::len).sum();
        let recorded = self.recorded.fetch_add(len, Ordering::SeqCst) + len;
        if recorded > self.cache.max_entry_size() {
            debug!(uri = %self.request.uri(), recorded, "body too large, recording abandoned");
            self.abandon();
            return;
        }
        self.body.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(data);
    }

    fn abandon(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
        self.body.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl ForwardHooks for CacheRecorder {
    fn on_data(&self, source: &NonBlockingBodySource) -> Result<Vec<Bytes>, BodyError> {
        let data = source.read_available()?;
        self.record(&data);
        Ok(data)
    }

    fn on_complete(&self) {
        if self.abandoned.load(Ordering::SeqCst) {
            return;
        }

        let chunks = std::mem::take(&mut *self.body.lock().unwrap_or_else(PoisonError::into_inner));
        let mut body = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
        for chunk in chunks {
            body.extend_from_slice(&chunk);
        }

        let mut response = Response::new(body.freeze());
        *response.status_mut() = self.status;
        *response.version_mut() = self.version;
        *response.headers_mut() = self.headers.clone();

        if self.cache.register(&self.request.to_request(), self.network_latency, &response).is_some() {
            debug!(uri = %self.request.uri(), "streamed response recorded");
        }
    }

    fn on_exception(&self, error: &BodyError) {
        debug!(uri = %self.request.uri(), cause = %error, "forwarding failed, recording abandoned");
        self.abandon();
    }
}
