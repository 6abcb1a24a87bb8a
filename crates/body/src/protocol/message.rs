use bytes::{Buf, Bytes};
use http::{HeaderMap, Version, header};

use crate::protocol::BodyError;

/// An item of a framed body stream.
///
/// Produced by the payload decoders and consumed by the payload encoders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem<Data: Buf = Bytes> {
    Chunk(Data),
    /// Marks the end of the body
    Eof,
}

impl<D: Buf> PayloadItem<D> {
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }

    #[inline]
    pub fn is_chunk(&self) -> bool {
        matches!(self, PayloadItem::Chunk(_))
    }
}

impl PayloadItem {
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }

    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }
}

/// How a body is delimited on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// `Content-Length` framed body
    Length(u64),
    /// `Transfer-Encoding: chunked` framed body
    Chunked,
    /// The body ends when the connection is closed
    CloseDelimited,
    /// No body at all
    Empty,
}

impl PayloadSize {
    /// Selects the framing mode of a message from its headers.
    ///
    /// `bodyless` is set for messages which never carry a body, such as
    /// responses to `HEAD` or `1xx`, `204` and `304` responses. A message
    /// without any length information is sent chunked on HTTP/1.1 and is
    /// delimited by connection close on older versions.
    pub fn for_message(version: Version, headers: &HeaderMap, bodyless: bool) -> Result<Self, BodyError> {
        if bodyless {
            return Ok(PayloadSize::Empty);
        }

        if let Some(te) = headers.get(header::TRANSFER_ENCODING) {
            let te = te.to_str().map_err(|e| BodyError::protocol(format!("invalid transfer-encoding header: {e}")))?;
            let last_coding = te.rsplit(',').next().map(str::trim).unwrap_or_default();
            return Ok(if last_coding.eq_ignore_ascii_case("chunked") {
                PayloadSize::Chunked
            } else {
                PayloadSize::CloseDelimited
            });
        }

        if let Some(cl) = headers.get(header::CONTENT_LENGTH) {
            let length = cl
                .to_str()
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .ok_or_else(|| BodyError::protocol(format!("invalid content-length header: {cl:?}")))?;
            return Ok(if length == 0 { PayloadSize::Empty } else { PayloadSize::Length(length) });
        }

        if version >= Version::HTTP_11 { Ok(PayloadSize::Chunked) } else { Ok(PayloadSize::CloseDelimited) }
    }

    #[inline]
    pub fn is_chunked(&self) -> bool {
        matches!(self, PayloadSize::Chunked)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Empty)
    }

    #[inline]
    pub fn is_close_delimited(&self) -> bool {
        matches!(self, PayloadSize::CloseDelimited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn bodyless_wins() {
        let map = headers(&[("content-length", "12")]);
        assert_eq!(PayloadSize::for_message(Version::HTTP_11, &map, true).unwrap(), PayloadSize::Empty);
    }

    #[test]
    fn transfer_encoding_over_content_length() {
        let map = headers(&[("transfer-encoding", "gzip, chunked"), ("content-length", "12")]);
        assert_eq!(PayloadSize::for_message(Version::HTTP_11, &map, false).unwrap(), PayloadSize::Chunked);

        let map = headers(&[("transfer-encoding", "gzip")]);
        assert_eq!(PayloadSize::for_message(Version::HTTP_11, &map, false).unwrap(), PayloadSize::CloseDelimited);
    }

    #[test]
    fn content_length() {
        let map = headers(&[("content-length", "12")]);
        assert_eq!(PayloadSize::for_message(Version::HTTP_11, &map, false).unwrap(), PayloadSize::Length(12));

        let map = headers(&[("content-length", "0")]);
        assert_eq!(PayloadSize::for_message(Version::HTTP_10, &map, false).unwrap(), PayloadSize::Empty);

        let map = headers(&[("content-length", "twelve")]);
        assert!(PayloadSize::for_message(Version::HTTP_11, &map, false).is_err());
    }

    #[test]
    fn no_length_information() {
        let map = HeaderMap::new();
        assert_eq!(PayloadSize::for_message(Version::HTTP_11, &map, false).unwrap(), PayloadSize::Chunked);
        assert_eq!(PayloadSize::for_message(Version::HTTP_10, &map, false).unwrap(), PayloadSize::CloseDelimited);
    }
}
