//! Shared set of connected peers

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use dias_core::{PeerId, PeerInfo};

/// Cloneable handle over a set of peers (inbound or outbound connections)
#[derive(Clone, Default)]
pub struct PeerSet {
    peers: Arc<RwLock<BTreeMap<PeerId, PeerInfo>>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the peer was not in the set
    pub fn insert(&self, peer: PeerInfo) -> bool {
        self.peers.write().insert(peer.id, peer).is_none()
    }

    pub fn remove(&self, id: &PeerId) -> Option<PeerInfo> {
        self.peers.write().remove(id)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.read().contains_key(id)
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.read().keys().copied().collect()
    }

    pub fn values(&self) -> Vec<PeerInfo> {
        self.peers.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    pub fn clear(&self) {
        self.peers.write().clear();
    }
}

impl std::fmt::Debug for PeerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.ids()).finish()
    }
}
