//! Vector clocks
//!
//! One counter per replica. Entries equal to zero are never stored, so two
//! clocks describing the same history always compare equal.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::PeerId;

/// Vector clock - causal history of a replica
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<PeerId, u64>", into = "BTreeMap<PeerId, u64>")]
pub struct VectorClock {
    clocks: BTreeMap<PeerId, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        VectorClock {
            clocks: BTreeMap::new(),
        }
    }

    /// Clock with a single entry
    pub fn single(peer: PeerId, value: u64) -> Self {
        let mut clock = VectorClock::new();
        clock.set(peer, value);
        clock
    }

    /// Get the counter for a replica
    #[inline]
    pub fn get(&self, peer: &PeerId) -> u64 {
        self.clocks.get(peer).copied().unwrap_or(0)
    }

    /// Set the counter for a replica
    pub fn set(&mut self, peer: PeerId, value: u64) {
        if value == 0 {
            self.clocks.remove(&peer);
        } else {
            self.clocks.insert(peer, value);
        }
    }

    /// Increment the counter for a replica
    pub fn increment(&mut self, peer: PeerId) {
        *self.clocks.entry(peer).or_insert(0) += 1;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &u64)> {
        self.clocks.iter()
    }

    /// Pointwise maximum
    pub fn merge(&self, other: &VectorClock) -> VectorClock {
        let mut merged = self.clone();
        merged.merge_in(other);
        merged
    }

    /// Pointwise maximum, in place
    pub fn merge_in(&mut self, other: &VectorClock) {
        for (peer, &value) in &other.clocks {
            self.clocks
                .entry(*peer)
                .and_modify(|c| *c = (*c).max(value))
                .or_insert(value);
        }
    }

    /// Add every counter of `author` to this clock
    pub fn increment_all(&self, author: &VectorClock) -> VectorClock {
        let mut next = self.clone();
        for (peer, &value) in &author.clocks {
            *next.clocks.entry(*peer).or_insert(0) += value;
        }
        next
    }

    /// True if this clock has seen everything `other` has
    pub fn dominates(&self, other: &VectorClock) -> bool {
        other.clocks.iter().all(|(peer, &value)| self.get(peer) >= value)
    }

    /// Exact equality, ignoring zero entries
    #[inline]
    pub fn is_identical(&self, other: &VectorClock) -> bool {
        self == other
    }

    /// Partial order between two clocks. `None` means concurrent.
    pub fn compare(&self, other: &VectorClock) -> Option<Ordering> {
        match (self.dominates(other), other.dominates(self)) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Greater),
            (false, true) => Some(Ordering::Less),
            (false, false) => None,
        }
    }

    /// Check if self happens-before other
    pub fn happens_before(&self, other: &VectorClock) -> bool {
        self.compare(other) == Some(Ordering::Less)
    }

    /// Neither clock has seen the other
    pub fn concurrent(&self, other: &VectorClock) -> bool {
        self.compare(other).is_none()
    }
}

impl From<BTreeMap<PeerId, u64>> for VectorClock {
    fn from(entries: BTreeMap<PeerId, u64>) -> Self {
        VectorClock {
            clocks: entries.into_iter().filter(|(_, v)| *v > 0).collect(),
        }
    }
}

impl From<VectorClock> for BTreeMap<PeerId, u64> {
    fn from(clock: VectorClock) -> Self {
        clock.clocks
    }
}

impl FromIterator<(PeerId, u64)> for VectorClock {
    fn from_iter<T: IntoIterator<Item = (PeerId, u64)>>(iter: T) -> Self {
        let entries: BTreeMap<PeerId, u64> = iter.into_iter().collect();
        VectorClock::from(entries)
    }
}
