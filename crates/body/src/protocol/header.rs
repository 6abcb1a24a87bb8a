//! Read-only body metadata taken from a message header.
//!
//! A body source keeps a [`BodyHeader`] so readers can learn the content type,
//! charset and announced length of the body without access to the full
//! message header.

use http::{HeaderMap, Version, header};
use mime::Mime;

use crate::protocol::{BodyError, PayloadSize};

#[derive(Debug, Clone)]
pub struct BodyHeader {
    content_type: Option<Mime>,
    content_length: Option<u64>,
    payload_size: PayloadSize,
}

impl Default for BodyHeader {
    fn default() -> Self {
        Self { content_type: None, content_length: None, payload_size: PayloadSize::Empty }
    }
}

impl BodyHeader {
    pub fn new(content_type: Option<Mime>, payload_size: PayloadSize) -> Self {
        let content_length = match payload_size {
            PayloadSize::Length(length) => Some(length),
            PayloadSize::Empty => Some(0),
            _ => None,
        };
        Self { content_type, content_length, payload_size }
    }

    /// Extracts body metadata from message headers.
    ///
    /// A malformed `Content-Type` is treated as absent, a malformed
    /// `Content-Length` is a protocol error.
    pub fn from_headers(version: Version, headers: &HeaderMap, bodyless: bool) -> Result<Self, BodyError> {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<Mime>().ok());
        let payload_size = PayloadSize::for_message(version, headers, bodyless)?;
        Ok(Self::new(content_type, payload_size))
    }

    pub fn content_type(&self) -> Option<&Mime> {
        self.content_type.as_ref()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn payload_size(&self) -> PayloadSize {
        self.payload_size
    }

    /// The declared charset, `utf-8` if none is declared.
    pub fn charset(&self) -> String {
        self.content_type
            .as_ref()
            .and_then(|mime| mime.get_param(mime::CHARSET))
            .map(|charset| charset.as_str().to_ascii_lowercase())
            .unwrap_or_else(|| "utf-8".to_string())
    }

    pub fn is_multipart(&self) -> bool {
        self.content_type.as_ref().is_some_and(|mime| mime.type_() == mime::MULTIPART)
    }

    pub fn is_event_stream(&self) -> bool {
        self.content_type.as_ref().is_some_and(|mime| mime.essence_str() == mime::TEXT_EVENT_STREAM.essence_str())
    }
}
