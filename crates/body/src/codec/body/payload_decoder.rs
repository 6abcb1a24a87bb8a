//! Decoder for message bodies of any framing.

use crate::codec::body::chunked_decoder::ChunkedDecoder;
use crate::codec::body::length_decoder::LengthDecoder;
use crate::protocol::{BodyError, PayloadItem, PayloadSize};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDecoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Length(LengthDecoder),
    Chunked(ChunkedDecoder),
    /// everything until the connection closes
    CloseDelimited { eof_sent: bool },
    NoBody { eof_sent: bool },
}

impl PayloadDecoder {
    pub fn for_size(payload_size: PayloadSize) -> Self {
        let kind = match payload_size {
            PayloadSize::Length(length) => Kind::Length(LengthDecoder::new(length)),
            PayloadSize::Chunked => Kind::Chunked(ChunkedDecoder::new()),
            PayloadSize::CloseDelimited => Kind::CloseDelimited { eof_sent: false },
            PayloadSize::Empty => Kind::NoBody { eof_sent: false },
        };
        Self { kind }
    }
}

fn eof_once(eof_sent: &mut bool) -> Option<PayloadItem> {
    if *eof_sent {
        return None;
    }
    *eof_sent = true;
    Some(PayloadItem::Eof)
}

impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = BodyError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match &mut self.kind {
            Kind::Length(decoder) => decoder.decode(src),
            Kind::Chunked(decoder) => decoder.decode(src),
            Kind::CloseDelimited { .. } if src.is_empty() => Ok(None),
            Kind::CloseDelimited { .. } => Ok(Some(PayloadItem::Chunk(src.split().freeze()))),
            Kind::NoBody { eof_sent } => Ok(eof_once(eof_sent)),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Kind::CloseDelimited { eof_sent } = &mut self.kind {
            if !src.is_empty() {
                return Ok(Some(PayloadItem::Chunk(src.split().freeze())));
            }
            return Ok(eof_once(eof_sent));
        }

        // a framed body must not end with the connection
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None if src.is_empty() => Ok(None),
            None => Err(BodyError::protocol("connection closed within a body frame")),
        }
    }
}
