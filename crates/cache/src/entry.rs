//! Cache entries and their freshness.

use std::fmt;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, Request, Response, StatusCode, Uri, Version};
use tracing::debug;

use crate::directive::{self, Directive};
use crate::fingerprint::fingerprint;
use crate::headers::{self, header_str};

const PERMANENT_REDIRECT_LIFETIME: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// The request part of a cache entry.
#[derive(Debug, Clone)]
pub struct CachedRequest {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
}

impl CachedRequest {
    pub fn from_request(request: &Request<Bytes>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            version: request.version(),
            headers: request.headers().clone(),
            body: request.body().clone(),
        }
    }

    pub fn to_request(&self) -> Request<Bytes> {
        let mut request = Request::new(self.body.clone());
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.version_mut() = self.version;
        *request.headers_mut() = self.headers.clone();
        request
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.uri, &self.headers, &self.body)
    }

    fn size(&self) -> usize {
        // request line: method, uri, version and separators
        self.method.as_str().len() + self.uri.to_string().len() + 12 + headers::encoded_len(&self.headers) + self.body.len()
    }
}

/// The response part of a cache entry.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
}

impl CachedResponse {
    pub fn new(status: StatusCode, version: Version, headers: HeaderMap, body: Bytes) -> Self {
        Self { status, version, headers, body }
    }

    /// A copy without the hop-by-hop and framing headers.
    pub fn from_response(response: &Response<Bytes>) -> Self {
        Self::new(response.status(), response.version(), headers::cacheable_copy(response.headers()), response.body().clone())
    }

    pub fn to_response(&self) -> Response<Bytes> {
        let mut response = Response::new(self.body.clone());
        *response.status_mut() = self.status;
        *response.version_mut() = self.version;
        *response.headers_mut() = self.headers.clone();
        response
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    fn size(&self) -> usize {
        // status line
        17 + headers::encoded_len(&self.headers) + self.body.len()
    }
}

/// How long an entry may be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// fresh until the `Expires` date
    Expires { expires_at: SystemTime },
    /// fresh for the `Cache-Control` max age
    CacheControl { expires_at: SystemTime, shared: bool },
    /// never expires, but must be revalidated before it is served
    Validation,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    fingerprint: String,
    request: CachedRequest,
    response: CachedResponse,
    cached_at: SystemTime,
    freshness: Freshness,
    size: usize,
}

impl CacheEntry {
    /// Builds the entry for a cacheable response received at `now`.
    ///
    /// `network_latency` is subtracted from the lifetime. Returns `None` if
    /// the response carries no usable freshness information or is already
    /// expired.
    pub fn create(
        request: CachedRequest,
        response: CachedResponse,
        network_latency: Duration,
        shared: bool,
        now: SystemTime,
    ) -> Option<Self> {
        let freshness = Self::compute_freshness(&response, network_latency, shared, now)?;
        let entry = Self::with_freshness(request, response, freshness, now);
        if entry.is_expired(now) {
            debug!(uri = %entry.request.uri, "response expired on arrival, not cached");
            return None;
        }
        Some(entry)
    }

    pub fn with_freshness(request: CachedRequest, response: CachedResponse, freshness: Freshness, now: SystemTime) -> Self {
        let size = request.size() + response.size();
        Self { fingerprint: request.fingerprint(), request, response, cached_at: now, freshness, size }
    }

    fn compute_freshness(response: &CachedResponse, network_latency: Duration, shared: bool, now: SystemTime) -> Option<Freshness> {
        let headers = &response.headers;

        if let Some(directives) = directive::cache_control(headers) {
            let mut expires_at = SystemTime::UNIX_EPOCH;
            for directive in &directives {
                match directive {
                    Directive::NoCache | Directive::NoStore | Directive::MustRevalidate | Directive::ProxyRevalidate => {
                        expires_at = SystemTime::UNIX_EPOCH;
                        break;
                    }
                    Directive::Private if shared => {
                        expires_at = SystemTime::UNIX_EPOCH;
                        break;
                    }
                    Directive::MaxAge(max_age) => {
                        expires_at = Duration::from_secs(*max_age)
                            .checked_sub(network_latency)
                            .filter(|lifetime| !lifetime.is_zero())
                            .and_then(|lifetime| now.checked_add(lifetime))
                            .unwrap_or(SystemTime::UNIX_EPOCH);
                    }
                    Directive::Malformed(raw) if raw.to_ascii_lowercase().starts_with("max-age") => {
                        debug!(directive = %raw, "malformed max-age, not cached");
                        return None;
                    }
                    _ => {}
                }
            }
            return Some(Freshness::CacheControl { expires_at, shared });
        }

        if let Some(expires) = headers.get(header::EXPIRES) {
            let expires = expires.to_str().ok().and_then(|value| httpdate::parse_http_date(value).ok())?;
            let expires_at = expires.checked_sub(network_latency).unwrap_or(SystemTime::UNIX_EPOCH);
            return Some(Freshness::Expires { expires_at: expires_at.max(SystemTime::UNIX_EPOCH) });
        }

        if headers.contains_key(header::ETAG) || headers.contains_key(header::LAST_MODIFIED) {
            return Some(Freshness::Validation);
        }

        if response.status == StatusCode::MOVED_PERMANENTLY {
            return now.checked_add(PERMANENT_REDIRECT_LIFETIME).map(|expires_at| Freshness::Expires { expires_at });
        }
        None
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn request(&self) -> &CachedRequest {
        &self.request
    }

    pub fn response(&self) -> &CachedResponse {
        &self.response
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    pub fn cached_at(&self) -> SystemTime {
        self.cached_at
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.cached_at).unwrap_or_default()
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        match self.freshness {
            Freshness::Expires { expires_at } | Freshness::CacheControl { expires_at, .. } => Some(expires_at),
            Freshness::Validation => None,
        }
    }

    /// Whether the entry is no longer fresh at `at`.
    pub fn is_expired(&self, at: SystemTime) -> bool {
        self.expires_at().is_some_and(|expires_at| at > expires_at)
    }

    pub fn must_revalidate(&self) -> bool {
        self.freshness == Freshness::Validation
    }

    /// Whether the entry was stored before `limit`.
    pub fn is_cached_before(&self, limit: SystemTime) -> bool {
        self.cached_at < limit
    }

    pub fn kind(&self) -> &'static str {
        match self.freshness {
            Freshness::Expires { .. } => "expires",
            Freshness::CacheControl { .. } => "cache-control",
            Freshness::Validation => "validation",
        }
    }

    /// A response to serve from this entry.
    ///
    /// For `Cache-Control` entries the max age (`s-maxage` for private
    /// caches) is rewritten to the remaining lifetime.
    pub fn new_response(&self, now: SystemTime) -> Response<Bytes> {
        let mut response = self.response.to_response();
        let Freshness::CacheControl { expires_at, shared } = self.freshness else {
            return response;
        };
        let Some(mut directives) = directive::cache_control(response.headers()) else {
            return response;
        };

        let remaining = expires_at.duration_since(now).unwrap_or_default().as_secs();
        for directive in directives.iter_mut() {
            match directive {
                Directive::MaxAge(max_age) if shared => *max_age = remaining,
                Directive::SMaxAge(max_age) if !shared => *max_age = remaining,
                _ => {}
            }
        }
        if let Ok(value) = HeaderValue::from_str(&directive::render(&directives)) {
            response.headers_mut().insert(header::CACHE_CONTROL, value);
        }
        response
    }

    /// The entry with `response` replacing the cached response.
    pub fn with_response(&self, response: CachedResponse) -> Self {
        Self::with_freshness(self.request.clone(), response, self.freshness, self.cached_at)
    }

    /// The entry updated with the headers of a `304 Not Modified` response.
    ///
    /// Hop-by-hop and framing headers of the 304 are not taken over.
    pub fn merge_not_modified(&self, not_modified: &HeaderMap) -> Self {
        let mut update = not_modified.clone();
        headers::remove_hop_by_hop(&mut update);
        update.remove(header::CONTENT_LENGTH);
        update.remove(header::CONTENT_TYPE);

        let mut merged = self.response.headers.clone();
        for name in update.keys() {
            merged.remove(name);
            for value in update.get_all(name) {
                merged.append(name.clone(), value.clone());
            }
        }

        let response = CachedResponse { headers: merged, ..self.response.clone() };
        self.with_response(response)
    }

    /// The validator to send with a conditional request.
    pub(crate) fn validator(&self) -> Option<(header::HeaderName, HeaderValue)> {
        let headers = &self.response.headers;
        if let Some(etag) = headers.get(header::ETAG) {
            return Some((header::IF_NONE_MATCH, etag.clone()));
        }
        header_str(headers, &header::LAST_MODIFIED)
            .and_then(|value| HeaderValue::from_str(value).ok())
            .map(|value| (header::IF_MODIFIED_SINCE, value))
    }
}

impl fmt::Display for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} ({}, size: {} bytes, age: {}s)",
            self.request.uri,
            self.response.status.as_u16(),
            self.kind(),
            self.size,
            self.age(SystemTime::now()).as_secs()
        )
    }
}
