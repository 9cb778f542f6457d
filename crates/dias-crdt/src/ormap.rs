//! Observed-remove map of multi-value registers
//!
//! Keys map to dot-tagged values sharing one causal context. A write to a
//! key replaces the values it observed. A removal drops the observed values;
//! a concurrent write to the same key survives the removal (add wins).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use dias_core::PeerId;

use crate::dot::{join_dot_fun, DotContext};
use crate::Dot;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrMap<K: Ord, V> {
    entries: BTreeMap<K, BTreeMap<Dot, V>>,
    context: DotContext,
}

impl<K: Ord, V> Default for OrMap<K, V> {
    fn default() -> Self {
        OrMap {
            entries: BTreeMap::new(),
            context: DotContext::new(),
        }
    }
}

impl<K: Ord + Clone, V: Clone> OrMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delta writing `value` under `key`
    pub fn write(&self, replica: PeerId, key: K, value: V) -> OrMap<K, V> {
        let dot = self.context.next_dot(replica);
        let mut context = self.observed(&key);
        context.insert(dot);

        let mut register = BTreeMap::new();
        register.insert(dot, value);
        let mut entries = BTreeMap::new();
        entries.insert(key, register);
        OrMap { entries, context }
    }

    /// Delta removing `key`
    pub fn remove(&self, key: &K) -> OrMap<K, V> {
        OrMap {
            entries: BTreeMap::new(),
            context: self.observed(key),
        }
    }

    fn observed(&self, key: &K) -> DotContext {
        self.entries
            .get(key)
            .map(|register| register.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn join(&mut self, other: &OrMap<K, V>) {
        let empty = BTreeMap::new();
        let mut keys: Vec<K> = self.entries.keys().cloned().collect();
        keys.extend(other.entries.keys().filter(|k| !self.entries.contains_key(*k)).cloned());

        let mut entries = BTreeMap::new();
        for key in keys {
            let ours = self.entries.get(&key).unwrap_or(&empty);
            let theirs = other.entries.get(&key).unwrap_or(&empty);
            let joined = join_dot_fun(ours, &self.context, theirs, &other.context);
            if !joined.is_empty() {
                entries.insert(key, joined);
            }
        }

        self.entries = entries;
        self.context.join(&other.context);
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Values currently held for a key
    pub fn get(&self, key: &K) -> Vec<&V> {
        self.entries
            .get(key)
            .map(|register| register.values().collect())
            .unwrap_or_default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolved map: every key with all its concurrent values
    pub fn value(&self) -> BTreeMap<K, Vec<V>> {
        self.entries
            .iter()
            .map(|(k, register)| (k.clone(), register.values().cloned().collect()))
            .collect()
    }
}
