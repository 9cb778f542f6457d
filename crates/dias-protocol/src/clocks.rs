//! Known clocks of remote replicas

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use dias_core::{PeerId, VectorClock};

#[derive(Debug, Default)]
struct ClocksInner {
    clocks: HashMap<PeerId, VectorClock>,
    /// Open sessions per peer; a peer's clock lives as long as one does
    sessions: HashMap<PeerId, usize>,
}

/// Shared table of per-peer vector clocks
///
/// The push and pull sessions with a peer read and write the same entry.
/// The entry is dropped when the last of them ends.
#[derive(Clone, Debug, Default)]
pub struct Clocks {
    inner: Arc<RwLock<ClocksInner>>,
}

impl Clocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known clock of a peer, empty if unknown
    pub fn get_for(&self, peer: &PeerId) -> VectorClock {
        self.inner.read().clocks.get(peer).cloned().unwrap_or_default()
    }

    /// Replace the clock of a peer
    pub fn set_for(&self, peer: PeerId, clock: VectorClock) {
        self.inner.write().clocks.insert(peer, clock);
    }

    /// Merge into the clock of a peer and return the result
    pub fn merge_for(&self, peer: PeerId, clock: &VectorClock) -> VectorClock {
        let mut inner = self.inner.write();
        let entry = inner.clocks.entry(peer).or_default();
        entry.merge_in(clock);
        entry.clone()
    }

    /// Register a session with `peer`
    pub fn open_session(&self, peer: PeerId) {
        *self.inner.write().sessions.entry(peer).or_default() += 1;
    }

    /// Unregister a session with `peer`. Returns true if it was the last one
    /// and the peer's clock was dropped.
    pub fn close_session(&self, peer: &PeerId) -> bool {
        let mut inner = self.inner.write();
        let remaining = match inner.sessions.get_mut(peer) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining > 0 {
            return false;
        }
        inner.sessions.remove(peer);
        inner.clocks.remove(peer);
        true
    }

    pub fn session_count(&self, peer: &PeerId) -> usize {
        self.inner.read().sessions.get(peer).copied().unwrap_or(0)
    }

    /// Forget a peer whatever sessions it has
    pub fn take_down(&self, peer: &PeerId) {
        let mut inner = self.inner.write();
        inner.clocks.remove(peer);
        inner.sessions.remove(peer);
    }

    pub fn knows(&self, peer: &PeerId) -> bool {
        self.inner.read().clocks.contains_key(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_merge_take_down() {
        let clocks = Clocks::new();
        let a = PeerId::from_bytes([1; 32]);
        let b = PeerId::from_bytes([2; 32]);
        assert!(clocks.get_for(&a).is_empty());

        clocks.set_for(a, VectorClock::single(a, 3));
        let merged = clocks.merge_for(a, &VectorClock::single(b, 1));
        assert_eq!(merged.get(&a), 3);
        assert_eq!(merged.get(&b), 1);

        clocks.set_for(a, VectorClock::single(b, 2));
        assert_eq!(clocks.get_for(&a), VectorClock::single(b, 2));

        clocks.take_down(&a);
        assert!(!clocks.knows(&a));
    }

    #[test]
    fn test_clock_outlives_all_but_last_session() {
        let clocks = Clocks::new();
        let a = PeerId::from_bytes([1; 32]);
        clocks.open_session(a);
        clocks.open_session(a);
        clocks.set_for(a, VectorClock::single(a, 4));

        assert!(!clocks.close_session(&a));
        assert_eq!(clocks.get_for(&a), VectorClock::single(a, 4));
        assert_eq!(clocks.session_count(&a), 1);

        assert!(clocks.close_session(&a));
        assert!(!clocks.knows(&a));
        assert_eq!(clocks.session_count(&a), 0);
    }
}
