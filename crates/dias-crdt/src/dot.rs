//! Dots and causal contexts
//!
//! A dot names one write: the replica that made it and that replica's
//! counter. A causal context is the set of dots a replica has observed,
//! stored as a compact per-replica prefix plus a cloud of stragglers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use dias_core::{PeerId, VectorClock};

/// Identifier of a single write
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dot {
    pub replica: PeerId,
    pub counter: u64,
}

impl Dot {
    pub fn new(replica: PeerId, counter: u64) -> Self {
        Dot { replica, counter }
    }
}

/// Set of observed dots
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DotContext {
    compact: VectorClock,
    cloud: BTreeSet<Dot>,
}

impl DotContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, dot: &Dot) -> bool {
        dot.counter <= self.compact.get(&dot.replica) || self.cloud.contains(dot)
    }

    /// Next unused dot for a replica
    pub fn next_dot(&self, replica: PeerId) -> Dot {
        let in_cloud = self
            .cloud
            .iter()
            .filter(|d| d.replica == replica)
            .map(|d| d.counter)
            .max()
            .unwrap_or(0);
        Dot::new(replica, self.compact.get(&replica).max(in_cloud) + 1)
    }

    pub fn insert(&mut self, dot: Dot) {
        if !self.contains(&dot) {
            self.cloud.insert(dot);
            self.compact();
        }
    }

    pub fn join(&mut self, other: &DotContext) {
        self.compact.merge_in(&other.compact);
        self.cloud.extend(other.cloud.iter().copied());
        self.compact();
    }

    pub fn is_empty(&self) -> bool {
        self.compact.is_empty() && self.cloud.is_empty()
    }

    /// Fold contiguous cloud dots into the compact prefix
    fn compact(&mut self) {
        let mut remaining = BTreeSet::new();
        // cloud is ordered by (replica, counter), so one pass suffices
        for dot in std::mem::take(&mut self.cloud) {
            let seen = self.compact.get(&dot.replica);
            if dot.counter == seen + 1 {
                self.compact.set(dot.replica, dot.counter);
            } else if dot.counter > seen {
                remaining.insert(dot);
            }
        }
        self.cloud = remaining;
    }
}

impl FromIterator<Dot> for DotContext {
    fn from_iter<T: IntoIterator<Item = Dot>>(iter: T) -> Self {
        let mut context = DotContext::new();
        for dot in iter {
            context.insert(dot);
        }
        context
    }
}

/// Join two dot-indexed value sets under their causal contexts
///
/// A dot survives if both sides still hold it, or if the side that lacks it
/// has never observed it.
pub(crate) fn join_dot_fun<V: Clone>(
    ours: &BTreeMap<Dot, V>,
    our_context: &DotContext,
    theirs: &BTreeMap<Dot, V>,
    their_context: &DotContext,
) -> BTreeMap<Dot, V> {
    let mut joined = BTreeMap::new();
    for (dot, value) in ours {
        if theirs.contains_key(dot) || !their_context.contains(dot) {
            joined.insert(*dot, value.clone());
        }
    }
    for (dot, value) in theirs {
        if !ours.contains_key(dot) && !our_context.contains(dot) {
            joined.insert(*dot, value.clone());
        }
    }
    joined
}
