//! The cache key of a request.

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName};
use http::Uri;

const SEPARATOR: char = '*';

/// Headers which do not select a different representation.
const IGNORED: [&str; 8] = [
    "user-agent",
    "referer",
    "cache-control",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
];

/// The URL, the remaining headers sorted by name, and the body.
///
/// Header order and the ignored headers do not change the fingerprint.
pub fn fingerprint(uri: &Uri, headers: &HeaderMap, body: &Bytes) -> String {
    let mut names: Vec<&HeaderName> = headers.keys().filter(|name| !IGNORED.contains(&name.as_str())).collect();
    names.sort_by(|a, b| a.as_str().cmp(b.as_str()));

    let mut fingerprint = uri.to_string();
    for name in names {
        fingerprint.push_str(name.as_str());
        fingerprint.push(SEPARATOR);
        for value in headers.get_all(name) {
            fingerprint.push_str(&String::from_utf8_lossy(value.as_bytes()));
            fingerprint.push(SEPARATOR);
        }
    }
    if !body.is_empty() {
        fingerprint.push_str(&String::from_utf8_lossy(body));
    }
    fingerprint
}

pub fn request_fingerprint(request: &http::Request<Bytes>) -> String {
    fingerprint(request.uri(), request.headers(), request.body())
}
