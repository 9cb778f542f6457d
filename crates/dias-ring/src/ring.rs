//! Peer ring
//!
//! Peers are kept ordered by their preamble bytes, then full id. The ring is
//! a cloneable handle: every clone mutates the same set and sees the same
//! events. Readers that need a consistent view take a `RingSnapshot`.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use dias_core::{PeerId, PeerInfo};

const EVENT_CAPACITY: usize = 256;

/// Ordering key of a ring member
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RingKey {
    pub preamble: Vec<u8>,
    pub id: PeerId,
}

impl RingKey {
    pub fn new(id: PeerId, preamble_byte_count: usize) -> Self {
        RingKey {
            preamble: id.preamble(preamble_byte_count).to_vec(),
            id,
        }
    }
}

/// Ring mutation notification
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RingEvent {
    /// Carries the added peer, or `None` for a removal
    Changed(Option<PeerInfo>),
}

/// Shared, ordered set of peers
#[derive(Clone)]
pub struct Ring {
    inner: Arc<RingInner>,
}

struct RingInner {
    preamble_byte_count: usize,
    peers: RwLock<BTreeMap<RingKey, PeerInfo>>,
    events: broadcast::Sender<RingEvent>,
}

impl Ring {
    pub fn new(preamble_byte_count: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ring {
            inner: Arc::new(RingInner {
                preamble_byte_count,
                peers: RwLock::new(BTreeMap::new()),
                events,
            }),
        }
    }

    fn key(&self, id: PeerId) -> RingKey {
        RingKey::new(id, self.inner.preamble_byte_count)
    }

    /// Add a peer. Returns false if it was already a member.
    pub fn add(&self, peer: PeerInfo) -> bool {
        let key = self.key(peer.id);
        {
            let mut peers = self.inner.peers.write();
            if peers.contains_key(&key) {
                return false;
            }
            peers.insert(key, peer.clone());
        }
        debug!(peer = %peer.id, "ring: peer added");
        let _ = self.inner.events.send(RingEvent::Changed(Some(peer)));
        true
    }

    /// Remove a peer. Returns false if it was not a member.
    pub fn remove(&self, id: &PeerId) -> bool {
        let removed = self.inner.peers.write().remove(&self.key(*id)).is_some();
        if removed {
            debug!(peer = %id, "ring: peer removed");
            let _ = self.inner.events.send(RingEvent::Changed(None));
        }
        removed
    }

    /// Replace the addresses of a member in place. Does not emit.
    pub fn update_addresses(&self, peer: PeerInfo) -> bool {
        let key = self.key(peer.id);
        match self.inner.peers.write().get_mut(&key) {
            Some(existing) => {
                existing.addrs = peer.addrs;
                true
            }
            None => false,
        }
    }

    pub fn has(&self, id: &PeerId) -> bool {
        self.inner.peers.read().contains_key(&self.key(*id))
    }

    pub fn get(&self, id: &PeerId) -> Option<PeerInfo> {
        self.inner.peers.read().get(&self.key(*id)).cloned()
    }

    /// Members in ring order
    pub fn values(&self) -> Vec<PeerInfo> {
        self.inner.peers.read().values().cloned().collect()
    }

    /// Members sharing a preamble
    pub fn bucket(&self, preamble: &[u8]) -> Vec<PeerInfo> {
        self.inner
            .peers
            .read()
            .iter()
            .filter(|(k, _)| k.preamble.as_slice() == preamble)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.peers.read().is_empty()
    }

    pub fn snapshot(&self) -> RingSnapshot {
        RingSnapshot {
            peers: self.values(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RingEvent> {
        self.inner.events.subscribe()
    }
}

impl std::fmt::Debug for Ring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ring").field("len", &self.len()).finish()
    }
}

/// Immutable ring contents, in ring order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RingSnapshot {
    peers: Vec<PeerInfo>,
}

impl RingSnapshot {
    /// Build a snapshot from arbitrary peers; duplicates are dropped
    pub fn from_peers<I: IntoIterator<Item = PeerInfo>>(peers: I) -> Self {
        let mut by_id: BTreeMap<PeerId, PeerInfo> = BTreeMap::new();
        for peer in peers {
            by_id.entry(peer.id).or_insert(peer);
        }
        RingSnapshot {
            peers: by_id.into_values().collect(),
        }
    }

    pub fn peers(&self) -> &[PeerInfo] {
        &self.peers
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.iter().any(|p| p.id == *id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
