//! Bounded set of recently seen keys

use std::collections::{HashSet, VecDeque};

/// Remembers the last `capacity` keys; the oldest is forgotten first.
#[derive(Debug)]
pub struct SeenSet {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl SeenSet {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `key`. Returns false if it was already present.
    pub fn insert(&mut self, key: &str) -> bool {
        if self.members.contains(key) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.order.push_back(key.to_string());
        self.members.insert(key.to_string());
        true
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.members.contains(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_reports_duplicates() {
        let mut seen = SeenSet::new(4);
        assert!(seen.insert("a"));
        assert!(!seen.insert("a"));
        assert!(seen.contains("a"));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_oldest_key_evicted_at_capacity() {
        let mut seen = SeenSet::new(2);
        seen.insert("a");
        seen.insert("b");
        seen.insert("c");
        assert!(!seen.contains("a"));
        assert!(seen.contains("b"));
        assert!(seen.contains("c"));
        assert_eq!(seen.len(), 2);
        // Forgotten keys are accepted again.
        assert!(seen.insert("a"));
    }

    #[test]
    fn test_zero_capacity_still_holds_one() {
        let mut seen = SeenSet::new(0);
        seen.insert("a");
        assert!(!seen.insert("a"));
    }
}
