//! [`BoundedLog`] – fixed-capacity, drop-oldest history buffer.
//!
//! Backs the meta-monitor's diagnostics history, error history and
//! per-series performance samples.

use std::collections::VecDeque;

/// A FIFO log that silently discards its oldest entry once full.
#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    capacity: usize,
    entries: VecDeque<T>,
}

impl<T> BoundedLog<T> {
    /// Create an empty log holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Append `entry`, returning the entry it evicted, if any.
    pub fn push(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
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

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.entries.iter()
    }
}

impl<T: Clone> BoundedLog<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_newest_entries_in_order() {
        let mut log = BoundedLog::new(3);
        for i in 0..5 {
            log.push(i);
        }
        assert_eq!(log.to_vec(), vec![2, 3, 4]);
        assert_eq!(log.latest(), Some(&4));
    }

    #[test]
    fn push_reports_evictions() {
        let mut log = BoundedLog::new(2);
        assert_eq!(log.push('a'), None);
        assert_eq!(log.push('b'), None);
        assert_eq!(log.push('c'), Some('a'));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut log = BoundedLog::new(0);
        log.push(1);
        log.push(2);
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.to_vec(), vec![2]);
    }
}
