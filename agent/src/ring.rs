//! Bounded history ring
//!
//! Fixed-capacity FIFO: appending past capacity evicts the oldest
//! entry. Readers only ever get owned snapshot copies, never the live
//! backing structure.

use std::collections::VecDeque;

/// Fixed-capacity FIFO buffer with oldest-eviction
#[derive(Debug)]
pub struct HistoryRing<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> HistoryRing<T> {
    /// Capacity must be non-zero (enforced by config validation)
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append, evicting the oldest entry when at capacity
    pub fn push(&mut self, entry: T) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// The most recently appended entry
    pub fn last(&self) -> Option<&T> {
        self.entries.back()
    }

    /// Owned copy of the current contents, oldest-first
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
