//! Growable byte buffer with cheap front extension.
//!
//! Message encryption appends padding and then prepends `key_id ||
//! msg_key`; reserving head room up front makes both directions O(n)
//! without a second allocation.

use std::ops::{Index, IndexMut};
use std::slice::SliceIndex;

#[derive(Clone, Debug)]
pub struct DequeBuffer {
    buf: Vec<u8>,
    head: usize,
    default_head: usize,
}

impl DequeBuffer {
    /// Reserves `back` bytes of tail room and `front` bytes of head room.
    pub fn with_capacity(back: usize, front: usize) -> Self {
        let mut buf = Vec::with_capacity(front + back);
        buf.resize(front, 0);
        Self {
            buf,
            head: front,
            default_head: front,
        }
    }

    /// Empties the buffer, keeping the allocation and head room.
    pub fn clear(&mut self) {
        self.buf.truncate(self.default_head);
        self.buf[..self.head].fill(0);
        self.head = self.default_head;
    }

    /// Prepends `slice`, shifting the contents only when the head room
    /// has run out.
    pub fn extend_front(&mut self, slice: &[u8]) {
        if self.head >= slice.len() {
            self.head -= slice.len();
        } else {
            let shift = slice.len() - self.head;
            self.buf.extend(std::iter::repeat(0).take(shift));
            self.buf.rotate_right(shift);
            self.head = 0;
        }
        self.buf[self.head..self.head + slice.len()].copy_from_slice(slice);
    }

    pub fn len(&self) -> usize {
        self.buf.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.buf.len()
    }
}

impl AsRef<[u8]> for DequeBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.buf[self.head..]
    }
}

impl AsMut<[u8]> for DequeBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.head..]
    }
}

impl<I: SliceIndex<[u8]>> Index<I> for DequeBuffer {
    type Output = I::Output;
    fn index(&self, index: I) -> &Self::Output {
        self.as_ref().index(index)
    }
}

impl<I: SliceIndex<[u8]>> IndexMut<I> for DequeBuffer {
    fn index_mut(&mut self, index: I) -> &mut Self::Output {
        self.as_mut().index_mut(index)
    }
}

impl Extend<u8> for DequeBuffer {
    fn extend<T: IntoIterator<Item = u8>>(&mut self, iter: T) {
        self.buf.extend(iter);
    }
}

impl<'a> Extend<&'a u8> for DequeBuffer {
    fn extend<T: IntoIterator<Item = &'a u8>>(&mut self, iter: T) {
        self.buf.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepend_within_head_room() {
        let mut buffer = DequeBuffer::with_capacity(16, 8);
        buffer.extend([1u8, 2, 3]);
        buffer.extend_front(&[9, 9]);
        assert_eq!(buffer.as_ref(), [9, 9, 1, 2, 3]);
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn prepend_past_head_room_shifts() {
        let mut buffer = DequeBuffer::with_capacity(4, 2);
        buffer.extend([1u8, 2]);
        buffer.extend_front(&[7, 7, 7, 7]);
        assert_eq!(buffer.as_ref(), [7, 7, 7, 7, 1, 2]);
    }

    #[test]
    fn clear_restores_head_room() {
        let mut buffer = DequeBuffer::with_capacity(8, 4);
        buffer.extend([1u8, 2, 3]);
        buffer.extend_front(&[4, 4, 4, 4]);
        buffer.clear();
        assert!(buffer.is_empty());
        buffer.extend_front(&[5, 5]);
        assert_eq!(buffer.as_ref(), [5, 5]);
    }
}
