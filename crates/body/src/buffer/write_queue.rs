use std::collections::VecDeque;

use bytes::{Buf, Bytes};

use crate::utils;

/// The outbound queue of a body sink.
///
/// While a write mark is set, appended data is kept in a separate
/// [`RewriteableBuffer`]. [`WriteQueue::reset_to_mark`] moves the write cursor
/// of that buffer back to its start so data appended afterwards overwrites the
/// buffered bytes at the same offsets. [`WriteQueue::drain`] only ever returns
/// the primary queue, the marked data joins it on [`WriteQueue::remove_mark`].
#[derive(Debug, Default)]
pub struct WriteQueue {
    queue: VecDeque<Bytes>,
    mark: Option<RewriteableBuffer>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one range, returns the number of bytes appended.
    pub fn append(&mut self, data: Bytes) -> usize {
        let len = data.len();
        if len == 0 {
            return 0;
        }

        match self.mark.as_mut() {
            Some(mark) => mark.append(data),
            None => self.queue.push_back(data),
        }
        len
    }

    pub fn append_all<I: IntoIterator<Item = Bytes>>(&mut self, data: I) -> usize {
        data.into_iter().map(|range| self.append(range)).sum()
    }

    /// Removes and returns the content of the primary queue.
    pub fn drain(&mut self) -> Vec<Bytes> {
        self.queue.drain(..).collect()
    }

    /// Starts a new write mark. Data of a previous mark is kept and moved to the
    /// primary queue first.
    pub fn mark_position(&mut self) {
        self.remove_mark();
        self.mark = Some(RewriteableBuffer::default());
    }

    /// Rewinds the write cursor to the mark, returns `false` if no mark is set.
    pub fn reset_to_mark(&mut self) -> bool {
        match self.mark.as_mut() {
            Some(mark) => {
                mark.reset_to_start();
                true
            }
            None => false,
        }
    }

    /// Moves the marked data to the end of the primary queue and clears the mark.
    pub fn remove_mark(&mut self) {
        if let Some(mark) = self.mark.take() {
            self.queue.extend(mark.ranges);
        }
    }

    #[inline]
    pub fn is_marked(&self) -> bool {
        self.mark.is_some()
    }

    /// Bytes held by the primary queue and the mark buffer.
    pub fn len(&self) -> usize {
        let marked = self.mark.as_ref().map_or(0, |mark| utils::remaining(&mark.ranges));
        self.queue.iter().map(Bytes::len).sum::<usize>() + marked
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty() && self.mark.as_ref().is_none_or(|mark| mark.ranges.is_empty())
    }
}

/// A list of ranges with a write cursor, indexed by range.
///
/// Appending at a cursor that points before the end overwrites the range under
/// the cursor. Ranges of different lengths are split or consumed so the byte
/// offsets of the data behind the overwritten part are preserved.
#[derive(Debug, Default)]
struct RewriteableBuffer {
    ranges: Vec<Bytes>,
    write_pos: usize,
}

impl RewriteableBuffer {
    fn reset_to_start(&mut self) {
        self.write_pos = 0;
    }

    fn append(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }

        let pos = self.write_pos;
        if pos >= self.ranges.len() {
            self.ranges.push(data);
            self.write_pos = self.ranges.len();
            return;
        }

        let mut current = self.ranges.remove(pos);
        if current.len() > data.len() {
            // keep the tail of the overwritten range behind the new data
            current.advance(data.len());
            self.ranges.insert(pos, current);
            self.ranges.insert(pos, data);
        } else {
            let mut to_remove = data.len() - current.len();
            self.ranges.insert(pos, data);

            let next = pos + 1;
            while to_remove > 0 && next < self.ranges.len() {
                let following = &mut self.ranges[next];
                if following.len() <= to_remove {
                    to_remove -= following.len();
                    self.ranges.remove(next);
                } else {
                    following.advance(to_remove);
                    to_remove = 0;
                }
            }
        }
        self.write_pos = pos + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drained(queue: &mut WriteQueue) -> Vec<u8> {
        queue.drain().iter().flat_map(|range| range.iter().copied()).collect()
    }

    #[test]
    fn append_and_drain() {
        let mut queue = WriteQueue::new();
        assert_eq!(queue.append(Bytes::from_static(b"hello ")), 6);
        assert_eq!(queue.append(Bytes::new()), 0);
        assert_eq!(queue.append_all([Bytes::from_static(b"wor"), Bytes::from_static(b"ld")]), 5);
        assert_eq!(queue.len(), 11);

        assert_eq!(drained(&mut queue), b"hello world");
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn marked_data_is_not_drained() {
        let mut queue = WriteQueue::new();
        queue.append(Bytes::from_static(b"head"));
        queue.mark_position();
        queue.append(Bytes::from_static(b"body"));

        assert_eq!(queue.len(), 8);
        assert_eq!(drained(&mut queue), b"head");
        assert!(!queue.is_empty());

        queue.remove_mark();
        assert!(!queue.is_marked());
        assert_eq!(drained(&mut queue), b"body");
    }

    #[test]
    fn reset_without_mark() {
        let mut queue = WriteQueue::new();
        assert!(!queue.reset_to_mark());
    }

    #[test]
    fn rewrite_with_same_segments() {
        let mut queue = WriteQueue::new();
        queue.append(Bytes::from_static(b"A"));
        queue.mark_position();
        queue.append(Bytes::from_static(b"xx"));
        queue.append(Bytes::from_static(b"yy"));

        assert!(queue.reset_to_mark());
        queue.append(Bytes::from_static(b"12"));
        queue.append(Bytes::from_static(b"34"));
        queue.remove_mark();

        assert_eq!(drained(&mut queue), b"A1234");
    }

    #[test]
    fn rewrite_with_shorter_segments_splits() {
        let mut queue = WriteQueue::new();
        queue.mark_position();
        queue.append(Bytes::from_static(b"xxxx"));
        queue.append(Bytes::from_static(b"yy"));

        queue.reset_to_mark();
        queue.append(Bytes::from_static(b"1"));
        queue.append(Bytes::from_static(b"23"));
        queue.append(Bytes::from_static(b"4"));
        queue.append(Bytes::from_static(b"56"));
        queue.remove_mark();

        assert_eq!(drained(&mut queue), b"123456");
    }

    #[test]
    fn rewrite_with_longer_segments_consumes() {
        let mut queue = WriteQueue::new();
        queue.mark_position();
        queue.append(Bytes::from_static(b"a"));
        queue.append(Bytes::from_static(b"bb"));
        queue.append(Bytes::from_static(b"ccc"));
        queue.append(Bytes::from_static(b"d"));

        queue.reset_to_mark();
        queue.append(Bytes::from_static(b"12345"));
        queue.append(Bytes::from_static(b"67"));
        queue.remove_mark();

        assert_eq!(drained(&mut queue), b"1234567");
    }

    #[test]
    fn partial_rewrite_keeps_tail() {
        let mut queue = WriteQueue::new();
        queue.mark_position();
        queue.append(Bytes::from_static(b"0000"));
        queue.append(Bytes::from_static(b"tail"));

        queue.reset_to_mark();
        queue.append(Bytes::from_static(b"42"));
        queue.remove_mark();

        assert_eq!(drained(&mut queue), b"4200tail");
    }

    #[test]
    fn new_mark_keeps_previous_marked_data() {
        let mut queue = WriteQueue::new();
        queue.mark_position();
        queue.append(Bytes::from_static(b"first"));
        queue.mark_position();
        queue.append(Bytes::from_static(b"second"));

        assert_eq!(drained(&mut queue), b"first");
        queue.remove_mark();
        assert_eq!(drained(&mut queue), b"second");
    }
}
