//! Multi-value register
//!
//! A write overwrites every value it has observed. Concurrent writes are
//! all kept until a later write observes them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use dias_core::PeerId;

use crate::dot::{join_dot_fun, DotContext};
use crate::Dot;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MvRegister<V> {
    values: BTreeMap<Dot, V>,
    context: DotContext,
}

impl<V> Default for MvRegister<V> {
    fn default() -> Self {
        MvRegister {
            values: BTreeMap::new(),
            context: DotContext::new(),
        }
    }
}

impl<V: Clone> MvRegister<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delta replacing every observed value with `value`
    pub fn write(&self, replica: PeerId, value: V) -> MvRegister<V> {
        let dot = self.context.next_dot(replica);
        let mut context: DotContext = self.values.keys().copied().collect();
        context.insert(dot);

        let mut values = BTreeMap::new();
        values.insert(dot, value);
        MvRegister { values, context }
    }

    pub fn join(&mut self, other: &MvRegister<V>) {
        self.values = join_dot_fun(&self.values, &self.context, &other.values, &other.context);
        self.context.join(&other.context);
    }

    /// Current values, ordered by the dot that wrote them
    pub fn values(&self) -> Vec<&V> {
        self.values.values().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
