//! Decoder for `Transfer-Encoding: chunked` bodies.
//!
//! Chunk extensions are ignored and trailer fields are passed over.

use crate::protocol::{BodyError, PayloadItem};
use bytes::{Buf, BytesMut};
use std::cmp;
use tokio_util::codec::Decoder;
use tracing::trace;

const MAX_LINE_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// the chunk size line
    Size,
    /// chunk data, with the bytes still to read
    Data(u64),
    /// the CRLF behind chunk data
    DataEnd,
    /// trailer fields up to the empty line
    Trailer,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: State,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: State::Size }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn find_line(src: &BytesMut) -> Result<Option<usize>, BodyError> {
    match src.windows(2).position(|window| window == b"\r\n") {
        Some(index) => Ok(Some(index)),
        None if src.len() > MAX_LINE_SIZE => Err(BodyError::protocol("chunk line too long")),
        None => Ok(None),
    }
}

fn parse_size(line: &[u8]) -> Result<u64, BodyError> {
    let size = line.split(|&b| b == b';').next().unwrap_or_default();
    let size = std::str::from_utf8(size).map_err(|e| BodyError::protocol(format!("invalid chunk size: {e}")))?;
    u64::from_str_radix(size.trim(), 16).map_err(|e| BodyError::protocol(format!("invalid chunk size {size:?}: {e}")))
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = BodyError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::Size => {
                    let Some(index) = find_line(src)? else {
                        return Ok(None);
                    };
                    let size = parse_size(&src[..index])?;
                    src.advance(index + 2);
                    trace!(size, "read chunk size");
                    self.state = if size == 0 { State::Trailer } else { State::Data(size) };
                }
                State::Data(remaining) => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let len = usize::try_from(remaining).map_or(src.len(), |remaining| cmp::min(remaining, src.len()));
                    let bytes = src.split_to(len).freeze();
                    let remaining = remaining - bytes.len() as u64;
                    self.state = if remaining == 0 { State::DataEnd } else { State::Data(remaining) };
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }
                State::DataEnd => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    if &src[..2] != b"\r\n" {
                        return Err(BodyError::protocol("missing CRLF behind chunk data"));
                    }
                    src.advance(2);
                    self.state = State::Size;
                }
                State::Trailer => {
                    let Some(index) = find_line(src)? else {
                        return Ok(None);
                    };
                    src.advance(index + 2);
                    if index == 0 {
                        self.state = State::Done;
                        return Ok(Some(PayloadItem::Eof));
                    }
                }
                State::Done => return Ok(None),
            }
        }
    }
}
