//! Grow-only counter

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use dias_core::PeerId;

/// Per-replica counts, merged by pointwise max
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GCounter {
    counts: BTreeMap<PeerId, u64>,
}

impl GCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delta raising the replica's component by `by`
    pub fn increment(&self, replica: PeerId, by: u64) -> GCounter {
        let current = self.counts.get(&replica).copied().unwrap_or(0);
        let mut delta = GCounter::new();
        delta.counts.insert(replica, current.saturating_add(by));
        delta
    }

    pub fn join(&mut self, other: &GCounter) {
        for (replica, &count) in &other.counts {
            self.counts
                .entry(*replica)
                .and_modify(|c| *c = (*c).max(count))
                .or_insert(count);
        }
    }

    pub fn value(&self) -> u64 {
        self.counts.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrent_increments_add_up() {
        let a = PeerId::from_bytes([1u8; 32]);
        let b = PeerId::from_bytes([2u8; 32]);

        let mut left = GCounter::new();
        let d1 = left.increment(a, 2);
        left.join(&d1);

        let mut right = GCounter::new();
        let d2 = right.increment(b, 3);
        right.join(&d2);

        left.join(&right);
        right.join(&left);
        assert_eq!(left.value(), 5);
        assert_eq!(left, right);

        // re-delivery of an old delta is harmless
        left.join(&d1);
        assert_eq!(left.value(), 5);
    }
}
