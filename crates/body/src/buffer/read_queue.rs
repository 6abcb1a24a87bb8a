use std::collections::VecDeque;

use bytes::Bytes;

use crate::protocol::BodyError;
use crate::utils::ensure;

/// The inbound queue of a body source.
///
/// Every append bumps a version counter, so readers can detect whether the
/// queue changed between two observations. While a read mark is set, consumed
/// ranges are remembered and pushed back to the front by [`ReadQueue::reset_to_mark`].
#[derive(Debug, Default)]
pub struct ReadQueue {
    chunks: VecDeque<Bytes>,
    size: usize,
    version: u64,
    mark: Option<Vec<Bytes>>,
    scan: Option<Scan>,
}

/// Progress of the last delimiter search.
#[derive(Debug)]
struct Scan {
    delimiter: Vec<u8>,
    /// no occurrence starts before this offset
    start: usize,
}

impl ReadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, data: Bytes) -> usize {
        let len = data.len();
        if len > 0 {
            self.size += len;
            self.chunks.push_back(data);
        }
        self.version += 1;
        len
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Changes on every append.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn read_all(&mut self) -> Vec<Bytes> {
        let ranges: Vec<Bytes> = self.chunks.drain(..).collect();
        self.size = 0;
        self.scan = None;
        self.remember(&ranges);
        ranges
    }

    /// Reads exactly `length` bytes, `None` if fewer are buffered.
    pub fn read_by_length(&mut self, length: usize) -> Option<Vec<Bytes>> {
        if length > self.size {
            return None;
        }
        let ranges = self.take(length);
        self.remember(&ranges);
        Some(ranges)
    }

    /// Reads up to the delimiter and consumes the delimiter.
    ///
    /// Returns `Ok(None)` if the delimiter has not been received yet, and
    /// fails if the delimiter does not start within the first `max_len` bytes.
    pub fn read_by_delimiter(&mut self, delimiter: &[u8], max_len: usize) -> Result<Option<Vec<Bytes>>, BodyError> {
        ensure!(!delimiter.is_empty(), BodyError::protocol("empty delimiter"));

        match self.index_of(delimiter) {
            Some(index) if index > max_len => Err(BodyError::max_read_size_exceeded(max_len)),
            Some(index) => {
                let ranges = self.take(index);
                let delimiter_ranges = self.take(delimiter.len());
                self.remember(&ranges);
                self.remember(&delimiter_ranges);
                Ok(Some(ranges))
            }
            None if self.size >= max_len.saturating_add(delimiter.len()) => {
                Err(BodyError::max_read_size_exceeded(max_len))
            }
            None => Ok(None),
        }
    }

    /// Position of the first occurrence of `delimiter` in the buffered data.
    ///
    /// Searching again for the same delimiter resumes where the last search
    /// stopped, so data arriving in small pieces is not scanned twice.
    pub fn index_of(&mut self, delimiter: &[u8]) -> Option<usize> {
        if delimiter.is_empty() || delimiter.len() > self.size {
            return None;
        }

        let start = match &self.scan {
            Some(scan) if scan.delimiter == delimiter => scan.start,
            _ => 0,
        };
        let found = self.find_from(delimiter, start);
        let start = found.unwrap_or(self.size - delimiter.len() + 1);
        match &mut self.scan {
            Some(scan) if scan.delimiter == delimiter => scan.start = start,
            scan => *scan = Some(Scan { delimiter: delimiter.to_vec(), start }),
        }
        found
    }

    /// A copy of the buffered ranges, the queue itself is not modified.
    pub fn copy_content(&self) -> Vec<Bytes> {
        self.chunks.iter().cloned().collect()
    }

    pub fn mark(&mut self) {
        self.mark = Some(Vec::new());
    }

    /// Puts the data read since the mark back to the front, the mark stays set.
    pub fn reset_to_mark(&mut self) -> bool {
        match self.mark.as_mut() {
            Some(consumed) => {
                for range in consumed.drain(..).rev() {
                    self.size += range.len();
                    self.chunks.push_front(range);
                }
                self.scan = None;
                true
            }
            None => false,
        }
    }

    pub fn remove_mark(&mut self) {
        self.mark = None;
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.size = 0;
        self.mark = None;
        self.scan = None;
    }

    fn take(&mut self, mut length: usize) -> Vec<Bytes> {
        if let Some(scan) = &mut self.scan {
            scan.start = scan.start.saturating_sub(length);
        }

        let mut ranges = Vec::new();
        while length > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };

            if front.len() <= length {
                length -= front.len();
                self.size -= front.len();
                if let Some(range) = self.chunks.pop_front() {
                    ranges.push(range);
                }
            } else {
                self.size -= length;
                ranges.push(front.split_to(length));
                length = 0;
            }
        }
        ranges
    }

    fn remember(&mut self, ranges: &[Bytes]) {
        if let Some(consumed) = self.mark.as_mut() {
            consumed.extend(ranges.iter().cloned());
        }
    }

    fn find_from(&self, delimiter: &[u8], start: usize) -> Option<usize> {
        let mut offset = 0;
        for (index, chunk) in self.chunks.iter().enumerate() {
            if offset + chunk.len() > start {
                let from = start.saturating_sub(offset);
                for (pos, byte) in chunk.iter().enumerate().skip(from) {
                    if *byte == delimiter[0] && self.matches_at(index, pos, delimiter) {
                        return Some(offset + pos);
                    }
                }
            }
            offset += chunk.len();
        }
        None
    }

    fn matches_at(&self, index: usize, pos: usize, delimiter: &[u8]) -> bool {
        let mut chunks = self.chunks.range(index..);
        let head = chunks.next().map_or(&[][..], |chunk| &chunk[pos..]);
        let mut bytes = head.iter().chain(chunks.flat_map(|chunk| chunk.iter()));
        delimiter.iter().all(|expected| bytes.next() == Some(expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::merge;

    fn queue_of(parts: &[&'static [u8]]) -> ReadQueue {
        let mut queue = ReadQueue::new();
        for part in parts {
            queue.append(Bytes::from_static(part));
        }
        queue
    }

    #[test]
    fn read_by_length_underflow() {
        let mut queue = queue_of(&[b"abc", b"def"]);
        assert!(queue.read_by_length(7).is_none());
        assert_eq!(queue.size(), 6);

        let ranges = queue.read_by_length(4).unwrap();
        assert_eq!(&merge(ranges)[..], b"abcd");
        assert_eq!(queue.size(), 2);
        assert_eq!(&merge(queue.read_all())[..], b"ef");
    }

    #[test]
    fn read_by_delimiter_across_chunks() {
        let mut queue = queue_of(&[b"GET / HT", b"TP/1.1\r", b"\nrest"]);
        let line = queue.read_by_delimiter(b"\r\n", 100).unwrap().unwrap();
        assert_eq!(&merge(line)[..], b"GET / HTTP/1.1");
        assert_eq!(&merge(queue.read_all())[..], b"rest");
    }

    #[test]
    fn read_by_delimiter_distinguishes_underflow_and_bound() {
        let mut queue = queue_of(&[b"abc"]);
        assert!(queue.read_by_delimiter(b"\r\n", 10).unwrap().is_none());

        let mut queue = queue_of(&[b"abcdef\r\n"]);
        assert!(matches!(
            queue.read_by_delimiter(b"\r\n", 4),
            Err(BodyError::MaxReadSizeExceeded { max_len: 4 })
        ));

        let mut queue = queue_of(&[b"abcdefgh"]);
        assert!(queue.read_by_delimiter(b"\r\n", 4).is_err());

        let mut queue = queue_of(&[b"abcd\r\n"]);
        assert_eq!(&merge(queue.read_by_delimiter(b"\r\n", 4).unwrap().unwrap())[..], b"abcd");
    }

    #[test]
    fn trickled_delimiter_search_keeps_chunks() {
        let mut queue = ReadQueue::new();
        for byte in b"content-type: text/plain\r" {
            queue.append(Bytes::copy_from_slice(&[*byte]));
            assert!(queue.read_by_delimiter(b"\r\n", 100).unwrap().is_none());
        }
        assert_eq!(queue.copy_content().len(), 25);

        // a different delimiter starts over
        assert_eq!(queue.index_of(b": "), Some(12));

        queue.append(Bytes::from_static(b"\nnext"));
        let line = queue.read_by_delimiter(b"\r\n", 100).unwrap().unwrap();
        assert_eq!(&merge(line)[..], b"content-type: text/plain");
        assert_eq!(queue.index_of(b"\r\n"), None);
        assert_eq!(&merge(queue.read_all())[..], b"next");
    }

    #[test]
    fn delimiter_found_again_after_reset() {
        let mut queue = queue_of(&[b"ab\r\ncd\r\n"]);
        queue.mark();
        assert_eq!(&merge(queue.read_by_delimiter(b"\r\n", 10).unwrap().unwrap())[..], b"ab");
        assert_eq!(queue.index_of(b"\r\n"), Some(2));

        assert!(queue.reset_to_mark());
        assert_eq!(queue.index_of(b"\r\n"), Some(2));
    }

    #[test]
    fn version_changes_on_append() {
        let mut queue = ReadQueue::new();
        let version = queue.version();
        queue.append(Bytes::from_static(b"x"));
        assert_ne!(queue.version(), version);
    }

    #[test]
    fn mark_and_reset() {
        let mut queue = queue_of(&[b"0123", b"4567"]);
        queue.mark();
        assert_eq!(&merge(queue.read_by_length(6).unwrap())[..], b"012345");

        assert!(queue.reset_to_mark());
        assert_eq!(queue.size(), 8);
        assert_eq!(&merge(queue.read_all())[..], b"01234567");

        queue.remove_mark();
        assert!(!queue.reset_to_mark());
        assert!(queue.is_empty());
    }

    #[test]
    fn copy_content_does_not_consume() {
        let queue = queue_of(&[b"ab", b"cd"]);
        assert_eq!(&merge(queue.copy_content())[..], b"abcd");
        assert_eq!(queue.size(), 4);
    }
}
