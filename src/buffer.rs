//! Bounded in-memory chunk buffer.

use std::cmp::Ordering;

/// Upper bound of the capacity reserved up front, so huge limits don't allocate eagerly.
const PREALLOCATE_LIMIT: usize = 64 * 1024;

/// Buffer limited by elements count.
/// Holds one chunk of input records while it is being accumulated and sorted.
pub struct ChunkBuffer<T> {
    limit: usize,
    inner: Vec<T>,
}

impl<T> ChunkBuffer<T> {
    /// Creates an empty buffer holding at most `limit` items.
    pub fn new(limit: usize) -> Self {
        ChunkBuffer {
            limit,
            inner: Vec::with_capacity(limit.min(PREALLOCATE_LIMIT)),
        }
    }

    /// Adds a new element to the buffer.
    pub fn push(&mut self, item: T) {
        self.inner.push(item);
    }

    /// Returns buffer length
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Checks if the buffer reached the limit.
    pub fn is_full(&self) -> bool {
        self.inner.len() >= self.limit
    }

    /// Sorts buffered items in place preserving the order of equal items.
    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: Fn(&T, &T) -> Ordering,
    {
        self.inner.sort_by(compare);
    }
}

impl<T> IntoIterator for ChunkBuffer<T> {
    type Item = T;
    type IntoIter = <Vec<T> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}
