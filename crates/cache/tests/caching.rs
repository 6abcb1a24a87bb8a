use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response, header};
use micro_body::executor::{ExecutionContext, ExecutionMode};
use micro_body::handler::Listener;
use micro_body::protocol::{BodyHeader, PayloadSize};
use micro_body::sink::BodySink;
use micro_body::source::NonBlockingBodySource;
use micro_body::transport::{ReceiveGate, pump_body};
use micro_cache::{CacheConfig, CacheError, CacheHandler, CacheRecorder, ResponseCache, make_upstream};
use tokio::sync::oneshot;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().with_max_level(tracing::Level::DEBUG).try_init();
}

fn request(path: &str) -> Request<Bytes> {
    Request::get(format!("http://example.org{path}")).body(Bytes::new()).unwrap()
}

#[tokio::test]
async fn repeated_requests_reach_upstream_once() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let upstream = make_upstream(move |_request: Request<Bytes>| {
        let counted = Arc::clone(&counted);
        async move {
            counted.fetch_add(1, Ordering::SeqCst);
            let response = Response::builder()
                .header(header::CACHE_CONTROL, "public, max-age=300")
                .header(header::CONNECTION, "keep-alive")
                .body(Bytes::from_static(b"cached body"))?;
            Ok::<_, CacheError>(response)
        }
    });
    let handler = CacheHandler::new(ResponseCache::new(&CacheConfig::with_max_size_kb(64)), upstream);

    for _ in 0..3 {
        let response = handler.handle(request("/page")).await.unwrap();
        assert_eq!(response.body(), "cached body");
    }

    let served = handler.handle(request("/page")).await.unwrap();
    assert!(!served.headers().contains_key(header::CONNECTION));
    assert_eq!(served.headers()["x-cache"], "HIT");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(handler.stats().hits(), 3);
    assert_eq!(handler.stats().misses(), 1);
    assert_eq!(handler.cache().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recorded_stream_is_served_from_cache() {
    init_tracing();
    let cache = ResponseCache::new(&CacheConfig::with_max_size_kb(64));
    let context = ExecutionContext::try_current().unwrap();

    let head = Response::builder()
        .header(header::CACHE_CONTROL, "max-age=300")
        .header(header::TRANSFER_ENCODING, "chunked")
        .body(())
        .unwrap();
    let recorder = CacheRecorder::new(Arc::clone(&cache), &request("/stream"), &head, Duration::from_millis(5)).unwrap();

    let source = NonBlockingBodySource::new(BodyHeader::new(None, PayloadSize::Chunked), context.clone());
    let (sink, transport) = BodySink::in_memory(context);
    let (closed_tx, closed_rx) = oneshot::channel();
    sink.add_close_listener(Listener::new(ExecutionMode::Unsynchronized, move || {
        let _ = closed_tx.send(());
    }));
    recorder.start(Arc::clone(&source), sink);

    let input: &'static [u8] = b"6\r\nstream\r\n5\r\ned in\r\n0\r\n\r\n";
    pump_body(input, PayloadSize::Chunked, source, ReceiveGate::new()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), closed_rx).await.unwrap().unwrap();
    assert_eq!(&transport.written()[..], b"streamed in");

    let upstream = make_upstream(|_request: Request<Bytes>| async {
        Err::<Response<Bytes>, _>(CacheError::upstream("origin must not be asked"))
    });
    let handler = CacheHandler::new(cache, upstream);
    let response = handler.handle(request("/stream")).await.unwrap();
    assert_eq!(response.body(), "streamed in");
    assert_eq!(response.headers()["x-cache"], "HIT");
}
