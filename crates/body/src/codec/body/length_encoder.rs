use crate::protocol::{BodyError, PayloadItem};
use crate::utils::ensure;
use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthEncoder {
    remaining: u64,
}

impl LengthEncoder {
    pub fn new(length: u64) -> Self {
        Self { remaining: length }
    }

    pub fn is_finish(&self) -> bool {
        self.remaining == 0
    }

    /// Checks that `len` more bytes fit the declared length, and complete it
    /// if `eof` is set.
    pub fn check(&self, len: u64, eof: bool) -> Result<(), BodyError> {
        ensure!(
            len <= self.remaining,
            BodyError::protocol(format!("body exceeds content-length by {} bytes", len - self.remaining))
        );
        ensure!(
            !eof || len == self.remaining,
            BodyError::protocol(format!("body is {} bytes shorter than content-length", self.remaining - len))
        );
        Ok(())
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for LengthEncoder {
    type Error = BodyError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            PayloadItem::Chunk(mut bytes) => {
                let len = bytes.remaining() as u64;
                self.check(len, false)?;

                while bytes.has_remaining() {
                    let chunk = bytes.chunk();
                    let n = chunk.len();
                    dst.extend_from_slice(chunk);
                    bytes.advance(n);
                }
                self.remaining -= len;
                Ok(())
            }
            PayloadItem::Eof => self.check(0, true),
        }
    }
}
