//! Revalidation of validator based entries.

use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use tracing::debug;

use crate::cache::ResponseCache;
use crate::cacheability::is_cacheable_success;
use crate::entry::{CacheEntry, CachedResponse};
use crate::error::CacheError;

/// Marks a request which must not be answered from the cache.
///
/// Conditional requests issued for revalidation carry it, so they pass the
/// cache layer on their way upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipCache;

/// The outcome of a revalidation.
#[derive(Debug)]
pub enum Revalidation {
    /// the origin answered 304, the entry got the new headers
    NotModified(Arc<CacheEntry>),
    /// the origin sent a new representation which replaced the stored one
    Replaced(Arc<CacheEntry>),
    /// the entry was dropped, the response is to be served as is
    Uncached(Response<Bytes>),
}

/// A conditional copy of the request stored with `entry`.
pub fn conditional_request(entry: &CacheEntry) -> Request<Bytes> {
    let mut request = entry.request().to_request();
    if let Some((name, value)) = entry.validator() {
        request.headers_mut().insert(name, value);
    }
    request.extensions_mut().insert(SkipCache);
    request
}

/// Applies the origin's answer to a conditional request for `entry`.
///
/// The entry is removed from `cache` unless the answer is a `304` or a
/// cacheable success.
pub fn apply(
    cache: &ResponseCache,
    entry: &CacheEntry,
    answer: Result<Response<Bytes>, CacheError>,
) -> Result<Revalidation, CacheError> {
    let response = match answer {
        Ok(response) => response,
        Err(e) => {
            debug!(entry = %entry, cause = %e, "revalidation failed");
            cache.remove(entry.fingerprint());
            return Err(e);
        }
    };

    let status = response.status();
    let updated = if status == StatusCode::NOT_MODIFIED {
        entry.merge_not_modified(response.headers())
    } else if is_cacheable_success(status) {
        entry.with_response(CachedResponse::from_response(&response))
    } else {
        debug!(entry = %entry, %status, "revalidation answered with non-cacheable status");
        cache.remove(entry.fingerprint());
        return Ok(Revalidation::Uncached(response));
    };

    let updated = Arc::new(updated);
    if !cache.replace(CacheEntry::clone(&updated)) {
        debug!(entry = %entry, "revalidated entry was evicted meanwhile");
    }

    if status == StatusCode::NOT_MODIFIED {
        debug!(entry = %updated, "cache entry revalidated, not modified");
        Ok(Revalidation::NotModified(updated))
    } else {
        debug!(entry = %updated, "cache entry replaced by revalidation");
        Ok(Revalidation::Replaced(updated))
    }
}
