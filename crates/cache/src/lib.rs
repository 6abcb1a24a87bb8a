//! A size bounded HTTP/1.x response cache
//!
//! Responses are keyed by a fingerprint of the request's URL, headers and
//! body. Their lifetime comes from `Cache-Control`, `Expires` or, for
//! permanent redirects, a thirty day default. Responses carrying only a
//! validator (`ETag`, `Last-Modified`) are kept and revalidated with a
//! conditional request whenever they are served.
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use micro_cache::{CacheConfig, CacheError, CacheHandler, ResponseCache, make_upstream};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CacheError> {
//!     let cache = ResponseCache::new(&CacheConfig::with_max_size_kb(10 * 1024));
//!     let handler = CacheHandler::new(
//!         cache,
//!         make_upstream(|_request: Request<Bytes>| async {
//!             let response = Response::builder().header("cache-control", "max-age=60").body(Bytes::from_static(b"hello"))?;
//!             Ok::<_, CacheError>(response)
//!         }),
//!     );
//!
//!     let request = Request::get("http://example.org/").body(Bytes::new())?;
//!     let response = handler.handle(request).await?;
//!     assert_eq!(response.body(), "hello");
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`ResponseCache`]: the store, evicting oldest entries first
//! - [`CacheEntry`]: a stored exchange and its freshness
//! - [`cacheability`]: which requests and responses take part in caching
//! - [`directive`]: `Cache-Control` parsing
//! - [`revalidate`]: conditional requests for validator based entries
//! - [`CacheHandler`]: the request level entry point in front of an [`Upstream`]
//! - [`CacheRecorder`]: caching a body while it is forwarded

mod cache;
pub mod cacheability;
mod config;
pub mod directive;
mod entry;
mod error;
pub mod fingerprint;
mod handler;
mod headers;
mod recorder;
pub mod revalidate;
mod stats;

pub use cache::ResponseCache;
pub use config::{CacheConfig, DEFAULT_ENTRY_SIZE_THRESHOLD_DIVISOR, DEFAULT_SWEEP_PERIOD};
pub use entry::{CacheEntry, CachedRequest, CachedResponse, Freshness};
pub use error::CacheError;
pub use handler::{CacheHandler, Upstream, UpstreamFn, make_upstream};
pub use recorder::CacheRecorder;
pub use revalidate::{Revalidation, SkipCache};
pub use stats::CacheStats;
