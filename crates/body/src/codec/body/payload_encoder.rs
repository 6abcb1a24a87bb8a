use crate::codec::body::chunked_encoder::ChunkedEncoder;
use crate::codec::body::length_encoder::LengthEncoder;
use crate::protocol::{BodyError, PayloadItem, PayloadSize};
use crate::utils;
use bytes::{Buf, Bytes, BytesMut};

use tokio_util::codec::Encoder;

/// Encodes body data for the framing of its message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEncoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Length(LengthEncoder),
    Chunked(ChunkedEncoder),
    /// passes data through, the body ends when the connection closes
    Identity,
    NoBody,
}

impl PayloadEncoder {
    pub fn for_size(payload_size: PayloadSize) -> Self {
        let kind = match payload_size {
            PayloadSize::Length(length) => Kind::Length(LengthEncoder::new(length)),
            PayloadSize::Chunked => Kind::Chunked(ChunkedEncoder::new()),
            PayloadSize::CloseDelimited => Kind::Identity,
            PayloadSize::Empty => Kind::NoBody,
        };
        Self { kind }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.kind, Kind::Chunked(_))
    }

    pub fn is_finish(&self) -> bool {
        match &self.kind {
            Kind::Length(encoder) => encoder.is_finish(),
            Kind::Chunked(encoder) => encoder.is_finish(),
            Kind::Identity | Kind::NoBody => true,
        }
    }

    /// Encodes a batch of drained ranges, followed by the body terminator if
    /// `eof` is set.
    pub fn encode_all(&mut self, ranges: Vec<Bytes>, eof: bool) -> Result<Bytes, BodyError> {
        match &self.kind {
            Kind::Identity => return Ok(utils::merge(ranges)),
            // nothing is counted unless the whole batch fits
            Kind::Length(encoder) => encoder.check(utils::remaining(&ranges) as u64, eof)?,
            Kind::Chunked(_) | Kind::NoBody => {}
        }

        let mut dst = BytesMut::with_capacity(utils::remaining(&ranges) + 16);
        for range in ranges {
            self.encode(PayloadItem::Chunk(range), &mut dst)?;
        }
        if eof {
            self.encode(PayloadItem::<Bytes>::Eof, &mut dst)?;
        }
        Ok(dst.freeze())
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for PayloadEncoder {
    type Error = BodyError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match &mut self.kind {
            Kind::Length(encoder) => encoder.encode(item, dst),
            Kind::Chunked(encoder) => encoder.encode(item, dst),
            Kind::Identity => {
                if let PayloadItem::Chunk(mut bytes) = item {
                    while bytes.has_remaining() {
                        let chunk = bytes.chunk();
                        let n = chunk.len();
                        dst.extend_from_slice(chunk);
                        bytes.advance(n);
                    }
                }
                Ok(())
            }
            Kind::NoBody => match item {
                PayloadItem::Chunk(bytes) if bytes.has_remaining() => {
                    Err(BodyError::protocol("message must not have a body"))
                }
                _ => Ok(()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_batches() {
        let mut encoder = PayloadEncoder::for_size(PayloadSize::Chunked);
        let encoded = encoder.encode_all(vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cde")], false).unwrap();
        assert_eq!(&encoded[..], b"2\r\nab\r\n3\r\ncde\r\n");

        let encoded = encoder.encode_all(Vec::new(), true).unwrap();
        assert_eq!(&encoded[..], b"0\r\n\r\n");
        assert!(encoder.is_finish());
    }

    #[test]
    fn rejected_batch_leaves_length_untouched() {
        let mut encoder = PayloadEncoder::for_size(PayloadSize::Length(5));
        let overrun = vec![Bytes::from_static(b"abc"), Bytes::from_static(b"def")];
        assert!(encoder.encode_all(overrun, false).is_err());
        assert!(encoder.encode_all(vec![Bytes::from_static(b"abc")], true).is_err());

        let encoded = encoder.encode_all(vec![Bytes::from_static(b"abc"), Bytes::from_static(b"de")], true).unwrap();
        assert_eq!(&encoded[..], b"abcde");
        assert!(encoder.is_finish());
    }

    #[test]
    fn identity_passes_through() {
        let mut encoder = PayloadEncoder::for_size(PayloadSize::CloseDelimited);
        let encoded = encoder.encode_all(vec![Bytes::from_static(b"raw")], true).unwrap();
        assert_eq!(&encoded[..], b"raw");
    }

    #[test]
    fn bodyless_rejects_data() {
        let mut encoder = PayloadEncoder::for_size(PayloadSize::Empty);
        assert!(encoder.encode_all(vec![Bytes::from_static(b"x")], false).is_err());
        assert!(encoder.encode_all(Vec::new(), true).unwrap().is_empty());
    }
}
