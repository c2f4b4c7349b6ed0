//! Redelivery guard for inbound updates.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// Default number of ids remembered before eviction kicks in.
pub const MAX_PROCESSED_MESSAGES: usize = 1000;

/// Bounded set of recently seen message keys.
///
/// Once it grows past `capacity`, the oldest half is dropped in one go.
pub struct ProcessedMessages<K> {
    capacity: usize,
    order: VecDeque<K>,
    seen: HashSet<K>,
}

impl<K: Hash + Eq + Clone> ProcessedMessages<K> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(2),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Record `key`. Returns false if it was already seen.
    pub fn insert(&mut self, key: K) -> bool {
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);

        if self.order.len() > self.capacity {
            for old in self.order.drain(..self.capacity / 2) {
                self.seen.remove(&old);
            }
        }
        true
    }

    #[cfg(test)]
    pub fn contains(&self, key: &K) -> bool {
        self.seen.contains(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.order.len()
    }
}
