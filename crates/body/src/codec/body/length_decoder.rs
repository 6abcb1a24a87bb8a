//! Decoder for bodies framed by a `Content-Length` header.

use std::cmp;

use crate::protocol::{BodyError, PayloadItem};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthDecoder {
    remaining: u64,
    eof_sent: bool,
}

impl LengthDecoder {
    pub fn new(length: u64) -> Self {
        Self { remaining: length, eof_sent: false }
    }
}

impl Decoder for LengthDecoder {
    type Item = PayloadItem;
    type Error = BodyError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.remaining == 0 {
            if self.eof_sent {
                return Ok(None);
            }
            self.eof_sent = true;
            return Ok(Some(PayloadItem::Eof));
        }

        if src.is_empty() {
            return Ok(None);
        }

        let len = usize::try_from(self.remaining).map_or(src.len(), |remaining| cmp::min(remaining, src.len()));
        let bytes = src.split_to(len).freeze();
        self.remaining -= bytes.len() as u64;
        Ok(Some(PayloadItem::Chunk(bytes)))
    }
}
