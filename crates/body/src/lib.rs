//! Streaming HTTP/1.x message bodies with flow control
//!
//! This crate provides the body layer of a micro HTTP stack: buffering body
//! data as it arrives, handing it to readers incrementally, writing bodies
//! back out with the right framing, and piping one body into another without
//! unbounded buffering.
//!
//! # Features
//!
//! - Non-blocking body sources with read-by-length and read-by-delimiter
//! - Blocking reads on top of non-blocking sources, with receive timeouts
//! - Body sinks with autoflush, sync and async flush, and write marks for rewriting
//! - Content-Length, chunked and close-delimited framing
//! - Forwarding between bodies with suspend/resume flow control
//! - An `http_body::Body` view of a body source
//!
//! # Example
//!
//! ```no_run
//! use micro_body::executor::ExecutionContext;
//! use micro_body::protocol::{BodyHeader, PayloadSize};
//! use micro_body::sink::{BodySink, FlushMode};
//! use micro_body::source::NonBlockingBodySource;
//! use micro_body::transport::{IoTransport, pump_body};
//! use std::sync::Arc;
//! use tokio::net::TcpStream;
//! use tokio::runtime::Handle;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let context = ExecutionContext::try_current()?;
//!
//!     let (inbound_reader, inbound_writer) = TcpStream::connect("127.0.0.1:8080").await?.into_split();
//!     let (_outbound_reader, outbound_writer) = TcpStream::connect("127.0.0.1:9090").await?.into_split();
//!
//!     let upstream = Arc::new(IoTransport::new(inbound_writer, &Handle::current()));
//!     let gate = upstream.gate();
//!     let header = BodyHeader::new(None, PayloadSize::Chunked);
//!     let source = NonBlockingBodySource::with_upstream(header.clone(), context.clone(), upstream);
//!
//!     let downstream = Arc::new(IoTransport::new(outbound_writer, &Handle::current()));
//!     let sink = BodySink::new(header, downstream, context);
//!     sink.set_flush_mode(FlushMode::Async);
//!     source.forward_to(sink)?;
//!
//!     // the source is suspended whenever the outbound side falls behind
//!     pump_body(inbound_reader, PayloadSize::Chunked, source, gate).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`source`]: the readable side, [`source::NonBlockingBodySource`] and its blocking and async views
//! - [`sink`]: the writable side, [`sink::BodySink`]
//! - [`forwarder`]: [`forwarder::BodyForwarder`] pumping a source into a sink
//! - [`buffer`]: the read and write queues behind sources and sinks
//! - [`codec`]: body framing encoders and decoders
//! - [`transport`]: the connection seam, with in-memory and tokio I/O implementations
//! - [`executor`]: where callbacks run, and timers
//! - [`handler`]: data handlers, write completions and listeners
//! - [`protocol`]: body headers, framing sizes and [`protocol::BodyError`]
//! - [`config`]: timeouts and thresholds
//!
//! # Callbacks
//!
//! Every callback declares an [`executor::ExecutionMode`]. Callbacks are never
//! invoked while a source or sink holds its internal lock, so they may call
//! back into the source or sink. Data handlers of one source never run
//! concurrently.

pub mod buffer;
pub mod codec;
pub mod config;
pub mod executor;
pub mod forwarder;
pub mod handler;
pub mod protocol;
pub mod sink;
pub mod source;
pub mod transport;

mod utils;
