//! Chunk budget and limited buffer implementations.

use std::mem;

use crate::{Entry, SortError};

/// Per-run memory budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkBudget {
    /// Budget expressed as a number of entries.
    Entries(usize),
    /// Budget expressed in bytes of in-memory entries.
    Bytes(u64),
}

impl ChunkBudget {
    /// Returns the number of entries the budget can hold.
    ///
    /// Fails with [`SortError::Capacity`] if the budget cannot hold even one entry.
    pub fn capacity(&self) -> Result<usize, SortError> {
        let capacity = match *self {
            ChunkBudget::Entries(entries) => entries,
            ChunkBudget::Bytes(bytes) => {
                usize::try_from(bytes / mem::size_of::<Entry>() as u64).unwrap_or(usize::MAX)
            }
        };

        if capacity == 0 {
            return Err(SortError::Capacity(format!(
                "chunk budget {:?} cannot hold a single entry of {} bytes",
                self,
                mem::size_of::<Entry>()
            )));
        }

        return Ok(capacity);
    }
}

impl Default for ChunkBudget {
    fn default() -> Self {
        ChunkBudget::Bytes(16 * 1024 * 1024)
    }
}

/// Buffer limited by elements count.
pub struct EntryBuffer<T> {
    limit: usize,
    inner: Vec<T>,
}

impl<T> EntryBuffer<T> {
    pub fn with_capacity(limit: usize) -> Self {
        EntryBuffer {
            limit,
            inner: Vec::with_capacity(limit),
        }
    }

    /// Adds a new element to the buffer.
    pub fn push(&mut self, item: T) {
        self.inner.push(item);
    }

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

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn as_slice(&self) -> &[T] {
        &self.inner
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.inner
    }
}

impl<T> IntoIterator for EntryBuffer<T> {
    type Item = T;
    type IntoIter = <Vec<T> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}
