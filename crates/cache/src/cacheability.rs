//! Which requests and responses take part in caching.

use std::time::SystemTime;

use http::header::{self, HeaderMap};
use http::{Method, Request, Response, StatusCode, Version};
use mime::Mime;
use tracing::debug;

use crate::directive::{self, Directive};
use crate::headers::{has_value, header_str};

pub(crate) fn is_cacheable_success(status: StatusCode) -> bool {
    matches!(status.as_u16(), 200 | 201)
}

pub(crate) fn is_cacheable_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302)
}

/// A request is served from the cache only if it is a plain HTTP/1.1 GET.
///
/// Conditional requests bypass the cache. A shared cache also skips secure
/// and credentialed requests.
pub fn is_request_cacheable<B>(request: &Request<B>, shared: bool) -> bool {
    if shared && request.uri().scheme() == Some(&http::uri::Scheme::HTTPS) {
        return false;
    }
    if request.version() != Version::HTTP_11 || request.method() != Method::GET {
        return false;
    }

    let headers = request.headers();
    if shared && (headers.contains_key(header::AUTHORIZATION) || headers.contains_key(header::COOKIE)) {
        return false;
    }
    !(headers.contains_key(header::IF_NONE_MATCH) || headers.contains_key(header::IF_MODIFIED_SINCE))
}

/// Whether a response may be stored, judged at `now`.
pub fn is_response_cacheable<B>(response: &Response<B>, shared: bool, now: SystemTime) -> bool {
    let status = response.status();
    if !is_cacheable_success(status) && !is_cacheable_redirect(status) {
        debug!(%status, "non-cacheable response status");
        return false;
    }
    if !matches!(response.version(), Version::HTTP_10 | Version::HTTP_11) {
        return false;
    }

    let headers = response.headers();
    if has_value(headers, &header::PRAGMA, "no-cache") {
        debug!("non-cacheable response, pragma no-cache");
        return false;
    }
    if headers.contains_key(header::SET_COOKIE) || headers.contains_key(header::VARY) {
        debug!("non-cacheable response, set-cookie or vary");
        return false;
    }
    if is_event_stream(headers) {
        return false;
    }

    if let Some(expires) = headers.get(header::EXPIRES) {
        let expires_at = expires.to_str().ok().and_then(|value| httpdate::parse_http_date(value).ok());
        match expires_at {
            Some(expires_at) if expires_at >= now => {}
            _ => {
                debug!(?expires, "non-cacheable response, expired or invalid expires");
                return false;
            }
        }
    }

    let directives = directive::cache_control(headers).unwrap_or_default();
    !directives.iter().any(|directive| directive.is_no_cache() || (shared && *directive == Directive::Private))
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    header_str(headers, &header::CONTENT_TYPE)
        .and_then(|value| value.parse::<Mime>().ok())
        .is_some_and(|mime| mime.essence_str() == mime::TEXT_EVENT_STREAM.essence_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn get(uri: &str) -> http::request::Builder {
        Request::builder().method(Method::GET).uri(uri).version(Version::HTTP_11)
    }

    fn ok() -> http::response::Builder {
        Response::builder().status(StatusCode::OK).version(Version::HTTP_11)
    }

    #[test]
    fn request_rules() {
        assert!(is_request_cacheable(&get("http://example.org/").body(()).unwrap(), true));
        assert!(!is_request_cacheable(&get("https://example.org/").body(()).unwrap(), true));
        assert!(is_request_cacheable(&get("https://example.org/").body(()).unwrap(), false));

        let post = get("/").method(Method::POST).body(()).unwrap();
        assert!(!is_request_cacheable(&post, false));

        let http10 = get("/").version(Version::HTTP_10).body(()).unwrap();
        assert!(!is_request_cacheable(&http10, false));

        let cookie = get("/").header(header::COOKIE, "a=b").body(()).unwrap();
        assert!(!is_request_cacheable(&cookie, true));
        assert!(is_request_cacheable(&cookie, false));

        let conditional = get("/").header(header::IF_NONE_MATCH, "\"v1\"").body(()).unwrap();
        assert!(!is_request_cacheable(&conditional, false));
    }

    #[test]
    fn response_rules() {
        let now = SystemTime::now();
        assert!(is_response_cacheable(&ok().body(()).unwrap(), true, now));

        let not_found = ok().status(StatusCode::NOT_FOUND).body(()).unwrap();
        assert!(!is_response_cacheable(&not_found, true, now));

        let redirect = ok().status(StatusCode::FOUND).body(()).unwrap();
        assert!(is_response_cacheable(&redirect, true, now));

        let vary = ok().header(header::VARY, "accept").body(()).unwrap();
        assert!(!is_response_cacheable(&vary, true, now));

        let private = ok().header(header::CACHE_CONTROL, "private, max-age=60").body(()).unwrap();
        assert!(!is_response_cacheable(&private, true, now));
        assert!(is_response_cacheable(&private, false, now));

        let no_store = ok().header(header::CACHE_CONTROL, "no-store").body(()).unwrap();
        assert!(!is_response_cacheable(&no_store, false, now));

        let events = ok().header(header::CONTENT_TYPE, "text/event-stream; charset=utf-8").body(()).unwrap();
        assert!(!is_response_cacheable(&events, false, now));
    }

    #[test]
    fn expires_must_be_valid_and_ahead() {
        let now = SystemTime::now();
        let ahead = httpdate::fmt_http_date(now + Duration::from_secs(3600));
        let behind = httpdate::fmt_http_date(now - Duration::from_secs(3600));

        let fresh = ok().header(header::EXPIRES, ahead).body(()).unwrap();
        assert!(is_response_cacheable(&fresh, true, now));

        let stale = ok().header(header::EXPIRES, behind).body(()).unwrap();
        assert!(!is_response_cacheable(&stale, true, now));

        let invalid = ok().header(header::EXPIRES, "0").body(()).unwrap();
        assert!(!is_response_cacheable(&invalid, true, now));
    }
}
