//! Grow-only set of strings

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Grow-only set. The resolved value is the sorted elements concatenated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GSet {
    elements: BTreeSet<String>,
}

impl GSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delta adding one element
    pub fn add(&self, element: impl Into<String>) -> GSet {
        let mut delta = GSet::new();
        delta.elements.insert(element.into());
        delta
    }

    pub fn contains(&self, element: &str) -> bool {
        self.elements.contains(element)
    }

    pub fn join(&mut self, other: &GSet) {
        self.elements.extend(other.elements.iter().cloned());
    }

    pub fn elements(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn value(&self) -> String {
        self.elements.iter().map(String::as_str).collect()
    }
}
