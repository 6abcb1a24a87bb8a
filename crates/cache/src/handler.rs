use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{Request, Response, StatusCode};
use tracing::debug;

use crate::cache::ResponseCache;
use crate::cacheability::{is_request_cacheable, is_response_cacheable};
use crate::directive::{self, Directive};
use crate::entry::CachedRequest;
use crate::error::CacheError;
use crate::revalidate::{self, Revalidation, SkipCache};
use crate::stats::CacheStats;

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
const DEFAULT_MAX_STALE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// The origin behind the cache.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn call(&self, request: Request<Bytes>) -> Result<Response<Bytes>, CacheError>;
}

#[derive(Debug)]
pub struct UpstreamFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Upstream for UpstreamFn<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<Bytes>, CacheError>> + Send,
{
    async fn call(&self, request: Request<Bytes>) -> Result<Response<Bytes>, CacheError> {
        (self.f)(request).await
    }
}

pub fn make_upstream<F, Fut>(f: F) -> UpstreamFn<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<Bytes>, CacheError>> + Send,
{
    UpstreamFn { f }
}

/// What the request's own `Cache-Control` asks of the cache.
#[derive(Debug)]
struct RequestDirectives {
    /// entries must still be fresh at this time, `None` if nothing can be
    min_fresh: Option<SystemTime>,
    /// entries stored before this time are too old
    max_old: Option<SystemTime>,
    only_if_cached: bool,
}

impl RequestDirectives {
    fn from_request(request: &Request<Bytes>, now: SystemTime) -> Self {
        let mut directives = Self { min_fresh: Some(now), max_old: None, only_if_cached: false };
        for directive in directive::cache_control(request.headers()).unwrap_or_default() {
            match directive {
                Directive::MinFresh(seconds) => directives.min_fresh = now.checked_add(Duration::from_secs(seconds)),
                Directive::MaxStale(limit) => {
                    let limit = limit.map_or(DEFAULT_MAX_STALE, Duration::from_secs);
                    directives.min_fresh = Some(now.checked_sub(limit).unwrap_or(SystemTime::UNIX_EPOCH));
                }
                Directive::MaxAge(seconds) => directives.max_old = now.checked_sub(Duration::from_secs(seconds)),
                Directive::OnlyIfCached => directives.only_if_cached = true,
                _ => {}
            }
        }
        directives
    }
}

/// Answers requests from a [`ResponseCache`], forwarding misses to the
/// [`Upstream`] and storing what comes back.
#[derive(Debug)]
pub struct CacheHandler<U> {
    cache: Arc<ResponseCache>,
    upstream: U,
    stats: CacheStats,
}

impl<U: Upstream> CacheHandler<U> {
    pub fn new(cache: Arc<ResponseCache>, upstream: U) -> Self {
        Self { cache, upstream, stats: CacheStats::default() }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub async fn handle(&self, request: Request<Bytes>) -> Result<Response<Bytes>, CacheError> {
        if request.extensions().get::<SkipCache>().is_some() || !is_request_cacheable(&request, self.cache.is_shared()) {
            return self.upstream.call(request).await;
        }
        let no_cache = directive::cache_control(request.headers())
            .is_some_and(|directives| directives.iter().any(Directive::is_no_cache));
        if no_cache {
            debug!(uri = %request.uri(), "request asks to bypass the cache");
            return self.upstream.call(request).await;
        }

        let now = SystemTime::now();
        let directives = RequestDirectives::from_request(&request, now);
        let entry = directives
            .min_fresh
            .and_then(|min_fresh| self.cache.get(&request, min_fresh))
            .filter(|entry| directives.max_old.is_none_or(|max_old| !entry.is_cached_before(max_old)));

        if let Some(entry) = entry {
            if !entry.must_revalidate() {
                debug!(entry = %entry, "cache hit");
                self.stats.record_hit();
                return Ok(with_x_cache(entry.new_response(now), "HIT"));
            }
            if directives.only_if_cached {
                self.stats.record_miss();
                return Ok(gateway_timeout());
            }

            let answer = self.upstream.call(revalidate::conditional_request(&entry)).await;
            match revalidate::apply(&self.cache, &entry, answer) {
                Ok(Revalidation::NotModified(updated)) => {
                    self.stats.record_hit();
                    return Ok(with_x_cache(updated.new_response(now), "HIT - revalidated"));
                }
                Ok(Revalidation::Replaced(updated)) => {
                    self.stats.record_miss();
                    return Ok(updated.new_response(now));
                }
                Ok(Revalidation::Uncached(response)) => {
                    self.stats.record_miss();
                    return Ok(response);
                }
                Err(e) => debug!(cause = %e, "revalidation failed, fetching a fresh response"),
            }
        } else if directives.only_if_cached {
            self.stats.record_miss();
            return Ok(gateway_timeout());
        }

        self.stats.record_miss();
        self.fetch(request).await
    }

    async fn fetch(&self, request: Request<Bytes>) -> Result<Response<Bytes>, CacheError> {
        let copy = CachedRequest::from_request(&request).to_request();

        let started = Instant::now();
        let response = self.upstream.call(request).await?;
        let latency = started.elapsed();

        if is_response_cacheable(&response, self.cache.is_shared(), SystemTime::now()) {
            self.stats.record_cacheable_response();
            self.cache.register(&copy, latency, &response);
        } else {
            self.stats.record_non_cacheable_response();
        }
        Ok(response)
    }
}

fn with_x_cache(mut response: Response<Bytes>, value: &'static str) -> Response<Bytes> {
    response.headers_mut().insert(X_CACHE, HeaderValue::from_static(value));
    response
}

fn gateway_timeout() -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = StatusCode::GATEWAY_TIMEOUT;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use http::header;

    fn cache() -> Arc<ResponseCache> {
        ResponseCache::new(&CacheConfig::default().with_max_size_bytes(100 * 1024))
    }

    fn get(cache_control: Option<&str>) -> Request<Bytes> {
        let mut builder = Request::get("http://example.org/doc");
        if let Some(cache_control) = cache_control {
            builder = builder.header(header::CACHE_CONTROL, cache_control);
        }
        builder.body(Bytes::new()).unwrap()
    }

    fn ok(cache_control: &str) -> Response<Bytes> {
        Response::builder()
            .header(header::CACHE_CONTROL, cache_control)
            .body(Bytes::from_static(b"hello"))
            .unwrap()
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let mut upstream = MockUpstream::new();
        upstream.expect_call().times(1).returning(|_| Ok(ok("max-age=60")));
        let handler = CacheHandler::new(cache(), upstream);

        let first = handler.handle(get(None)).await.unwrap();
        assert!(!first.headers().contains_key(X_CACHE));

        let second = handler.handle(get(None)).await.unwrap();
        assert_eq!(second.headers()[X_CACHE], "HIT");
        assert_eq!(&second.body()[..], b"hello");

        let stats = handler.stats();
        assert_eq!((stats.hits(), stats.misses(), stats.cacheable_responses()), (1, 1, 1));
        assert_eq!(stats.hit_ratio(), 0.5);
    }

    #[tokio::test]
    async fn no_cache_request_bypasses() {
        let mut upstream = MockUpstream::new();
        upstream.expect_call().times(2).returning(|_| Ok(ok("max-age=60")));
        let handler = CacheHandler::new(cache(), upstream);

        handler.handle(get(None)).await.unwrap();
        let bypassed = handler.handle(get(Some("no-cache"))).await.unwrap();
        assert!(!bypassed.headers().contains_key(X_CACHE));
        assert_eq!(handler.stats().hits(), 0);
    }

    #[tokio::test]
    async fn skip_cache_tag_bypasses() {
        let mut upstream = MockUpstream::new();
        upstream.expect_call().times(2).returning(|_| Ok(ok("max-age=60")));
        let handler = CacheHandler::new(cache(), upstream);

        handler.handle(get(None)).await.unwrap();
        let mut tagged = get(None);
        tagged.extensions_mut().insert(SkipCache);
        handler.handle(tagged).await.unwrap();
        assert_eq!(handler.stats().hits(), 0);
    }

    #[tokio::test]
    async fn only_if_cached_miss_is_gateway_timeout() {
        let upstream = MockUpstream::new();
        let handler = CacheHandler::new(cache(), upstream);

        let response = handler.handle(get(Some("only-if-cached"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(handler.stats().misses(), 1);
    }

    #[tokio::test]
    async fn min_fresh_beyond_lifetime_misses() {
        let mut upstream = MockUpstream::new();
        upstream.expect_call().times(2).returning(|_| Ok(ok("max-age=60")));
        let handler = CacheHandler::new(cache(), upstream);

        handler.handle(get(None)).await.unwrap();
        let response = handler.handle(get(Some("min-fresh=120"))).await.unwrap();
        assert!(!response.headers().contains_key(X_CACHE));

        let response = handler.handle(get(Some("min-fresh=10"))).await.unwrap();
        assert_eq!(response.headers()[X_CACHE], "HIT");
    }

    #[tokio::test]
    async fn validator_entry_is_revalidated() {
        let mut upstream = MockUpstream::new();
        upstream.expect_call().times(2).returning(|request| {
            let response = if request.headers().get(header::IF_NONE_MATCH).is_some_and(|etag| etag == "\"v1\"") {
                assert!(request.extensions().get::<SkipCache>().is_some());
                Response::builder().status(StatusCode::NOT_MODIFIED).body(Bytes::new())
            } else {
                Response::builder().header(header::ETAG, "\"v1\"").body(Bytes::from_static(b"tagged"))
            };
            Ok(response.unwrap())
        });
        let handler = CacheHandler::new(cache(), upstream);

        handler.handle(get(None)).await.unwrap();
        let revalidated = handler.handle(get(None)).await.unwrap();
        assert_eq!(revalidated.headers()[X_CACHE], "HIT - revalidated");
        assert_eq!(&revalidated.body()[..], b"tagged");
    }

    #[tokio::test]
    async fn non_cacheable_response_is_counted() {
        let upstream = make_upstream(|_| async {
            Ok(Response::builder().status(StatusCode::NOT_FOUND).body(Bytes::new()).unwrap())
        });
        let handler = CacheHandler::new(cache(), upstream);

        handler.handle(get(None)).await.unwrap();
        assert_eq!(handler.stats().non_cacheable_responses(), 1);
        assert!(handler.cache().is_empty());
    }
}
