//! Collaboration membership
//!
//! Members are kept in an OR-Map from peer id (base58) to the peer's sorted
//! addresses. Full states and short digests travel over the application
//! gossip topic; merged changes are mirrored into the member table and the
//! collaboration ring, which drives the connection manager.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use dias_core::{DiasError, DiasResult, PeerId, PeerInfo, VectorClock};
use dias_crdt::OrMap;
use dias_crypto::CollaborationKeys;
use dias_protocol::Protocol;
use dias_ring::{DiasSet, Ring};
use dias_transport::{GlobalConnectionManager, Gossip};
use dias_wire::{GossipMessage, RemoteMembership};

use crate::{
    membership_digest, CollaborationConnectionManager, ConnectionEvent, ConnectionObserver,
    GossipHeuristic,
    MembershipConfig, ObserverGuard,
};

const EVENT_CAPACITY: usize = 256;

/// Peer id string to sorted addresses
pub type MemberMap = OrMap<String, Vec<String>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipPhase {
    Uninitialized,
    Active,
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MembershipEvent {
    PeerJoined(PeerInfo),
    PeerAddressesChanged(PeerInfo),
    PeerLeft(PeerId),
    /// Emitted once after any batch of the above
    Changed,
}

struct MembershipState {
    phase: MembershipPhase,
    local: Option<PeerInfo>,
    crdt: MemberMap,
    members: BTreeMap<PeerId, PeerInfo>,
    /// Someone has membership wrong; send the full state next tick
    urgent: bool,
}

impl MembershipState {
    fn digest(&self) -> DiasResult<String> {
        membership_digest(self.members.values())
    }

    /// Write our own addresses into the CRDT unless they are already the
    /// only value there. Returns true if a write happened.
    fn ensure_self(&mut self) -> bool {
        let Some(local) = &self.local else {
            return false;
        };
        let key = local.id.to_base58();
        let addrs = local.sorted_addrs();
        let current = self.crdt.get(&key);
        if current.len() == 1 && *current[0] == addrs {
            return false;
        }
        let delta = self.crdt.write(local.id, key, addrs);
        self.crdt.join(&delta);
        true
    }
}

/// Membership of one collaboration. Cloning gives another handle.
#[derive(Clone)]
pub struct Membership {
    inner: Arc<MembershipInner>,
}

struct MembershipInner {
    collaboration: String,
    type_name: String,
    self_id: PeerId,
    gcm: GlobalConnectionManager,
    gossip: Gossip,
    ring: Ring,
    connections: CollaborationConnectionManager,
    config: MembershipConfig,
    state: Mutex<MembershipState>,
    events: broadcast::Sender<MembershipEvent>,
    evictions: Mutex<Option<mpsc::UnboundedReceiver<PeerInfo>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Membership {
    /// `gossip` publishes on the application topic; messages carry the
    /// collaboration name as their own topic.
    pub fn new(
        collaboration: &str,
        type_name: &str,
        gcm: GlobalConnectionManager,
        gossip: Gossip,
        protocol: Arc<Protocol>,
        keys: Option<Arc<CollaborationKeys>>,
        config: MembershipConfig,
    ) -> DiasResult<Self> {
        config.validate()?;
        let self_id = protocol.self_id();
        let ring = Ring::new(config.ring.preamble_byte_count);
        let dias = DiasSet::new(self_id, &config.ring);
        let (evictions_tx, evictions_rx) = mpsc::unbounded_channel();
        let connections = CollaborationConnectionManager::new(
            ring.clone(),
            dias,
            gcm.clone(),
            protocol,
            keys,
            config.connections.clone(),
            evictions_tx,
        )?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Membership {
            inner: Arc::new(MembershipInner {
                collaboration: collaboration.to_string(),
                type_name: type_name.to_string(),
                self_id,
                gcm,
                gossip,
                ring,
                connections,
                config,
                state: Mutex::new(MembershipState {
                    phase: MembershipPhase::Uninitialized,
                    local: None,
                    crdt: MemberMap::new(),
                    members: BTreeMap::new(),
                    urgent: false,
                }),
                events,
                evictions: Mutex::new(Some(evictions_rx)),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Announce ourselves, start connecting and gossiping
    pub async fn start(&self) -> DiasResult<()> {
        let inner = &self.inner;
        if inner.state.lock().phase != MembershipPhase::Uninitialized {
            return Err(DiasError::InvalidState("membership already started".into()));
        }
        let local = inner.gcm.transport().local_peer().await?;
        if local.id != inner.self_id {
            return Err(DiasError::InvalidState(format!(
                "transport peer {} is not the collaboration replica {}",
                local.id, inner.self_id
            )));
        }

        let evictions = {
            let mut state = inner.state.lock();
            if state.phase != MembershipPhase::Uninitialized {
                return Err(DiasError::InvalidState("membership already started".into()));
            }
            state.phase = MembershipPhase::Active;
            state.local = Some(local.clone());
            state.ensure_self();
            if local.has_addrs() {
                state.members.insert(local.id, local.clone());
            }
            state.urgent = true;
            inner.evictions.lock().take()
        };

        inner.connections.start();

        let mut tasks = Vec::new();
        if let Some(evictions) = evictions {
            tasks.push(tokio::spawn(eviction_listener(Arc::downgrade(inner), evictions)));
        }
        tasks.push(tokio::spawn(gossip_ticker(Arc::downgrade(inner))));
        inner.tasks.lock().extend(tasks);

        info!(
            collaboration = %inner.collaboration,
            peer = %local.id,
            addrs = local.addrs.len(),
            "membership started"
        );
        inner.emit(MembershipEvent::Changed);
        Ok(())
    }

    pub async fn stop(&self) {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            if state.phase == MembershipPhase::Stopped {
                return;
            }
            state.phase = MembershipPhase::Stopped;
        }
        for task in inner.tasks.lock().drain(..) {
            task.abort();
        }
        inner.connections.stop().await;
        info!(collaboration = %inner.collaboration, "membership stopped");
    }

    /// Merge what another member told us
    pub fn deliver_remote_membership(&self, remote: RemoteMembership) -> DiasResult<()> {
        self.inner.deliver(remote)
    }

    /// Publish our view now: full state and digest if someone is behind,
    /// only the digest otherwise
    pub async fn gossip_now(&self) -> DiasResult<()> {
        self.inner.gossip_now().await
    }

    pub fn collaboration(&self) -> &str {
        &self.inner.collaboration
    }

    pub fn phase(&self) -> MembershipPhase {
        self.inner.state.lock().phase
    }

    pub fn needs_urgent_broadcast(&self) -> bool {
        self.inner.state.lock().urgent
    }

    pub fn ring(&self) -> &Ring {
        &self.inner.ring
    }

    pub fn connections(&self) -> &CollaborationConnectionManager {
        &self.inner.connections
    }

    pub fn config(&self) -> &MembershipConfig {
        &self.inner.config
    }

    pub fn peer_count(&self) -> usize {
        self.inner.state.lock().members.len()
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.inner.state.lock().members.keys().copied().collect()
    }

    pub fn peer_addresses(&self, peer: &PeerId) -> Option<Vec<String>> {
        self.inner.state.lock().members.get(peer).map(PeerInfo::sorted_addrs)
    }

    pub fn summary_digest(&self) -> DiasResult<String> {
        self.inner.state.lock().digest()
    }

    /// Encoded membership CRDT, as sent in a full gossip message
    pub fn encoded_state(&self) -> DiasResult<Vec<u8>> {
        dias_wire::encode(&self.inner.state.lock().crdt)
    }

    pub fn outbound_connection_count(&self) -> usize {
        self.inner.connections.outbound_connection_count()
    }

    pub fn outbound_connected_peers(&self) -> Vec<PeerId> {
        self.inner.connections.outbound_connected_peers()
    }

    pub fn inbound_connection_count(&self) -> usize {
        self.inner.connections.inbound_connection_count()
    }

    pub fn inbound_connected_peers(&self) -> Vec<PeerId> {
        self.inner.connections.inbound_connected_peers()
    }

    pub fn vector_clock(&self, peer: &PeerId) -> VectorClock {
        self.inner.connections.vector_clock(peer)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.inner.events.subscribe()
    }

    pub fn subscribe_connections(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.connections.subscribe()
    }

    pub fn observe(&self, observer: Arc<dyn ConnectionObserver>) -> ObserverGuard {
        self.inner.connections.observe(observer)
    }
}

impl std::fmt::Debug for Membership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Membership")
            .field("collaboration", &self.inner.collaboration)
            .field("phase", &state.phase)
            .field("members", &state.members.len())
            .finish()
    }
}

impl MembershipInner {
    fn emit(&self, event: MembershipEvent) {
        let _ = self.events.send(event);
    }

    fn deliver(&self, remote: RemoteMembership) -> DiasResult<()> {
        match remote {
            RemoteMembership::Summary(digest) => {
                let mut state = self.state.lock();
                if state.phase != MembershipPhase::Active {
                    return Ok(());
                }
                if digest != state.digest()? {
                    debug!(collaboration = %self.collaboration, "membership digest differs");
                    state.urgent = true;
                }
                Ok(())
            }
            RemoteMembership::Full(bytes) => {
                let remote: MemberMap = dias_wire::decode(&bytes)?;
                let changes = {
                    let mut state = self.state.lock();
                    if state.phase != MembershipPhase::Active {
                        return Ok(());
                    }
                    state.crdt.join(&remote);
                    self.sync_members(&mut state)
                };
                self.apply(changes);
                Ok(())
            }
        }
    }

    /// Bring the member table in line with the merged CRDT
    fn sync_members(&self, state: &mut MembershipState) -> Vec<MembershipEvent> {
        let mut resolved: BTreeMap<PeerId, BTreeSet<String>> = BTreeMap::new();
        for (key, values) in state.crdt.value() {
            match PeerId::from_base58(&key) {
                Ok(id) => {
                    resolved.insert(id, values.into_iter().flatten().collect());
                }
                Err(e) => warn!(
                    collaboration = %self.collaboration,
                    key = %key,
                    error = %e,
                    "bad member id"
                ),
            }
        }

        let mut changes = Vec::new();
        if let Some(local) = state.local.clone() {
            if resolved.get(&local.id) != Some(&local.addrs) {
                debug!(collaboration = %self.collaboration, "correcting our own membership entry");
                state.ensure_self();
                state.urgent = true;
            }
        }

        for (id, addrs) in &resolved {
            if *id == self.self_id {
                continue;
            }
            let peer = PeerInfo {
                id: *id,
                addrs: addrs.clone(),
            };
            match state.members.get(id) {
                None => {
                    state.members.insert(*id, peer.clone());
                    changes.push(MembershipEvent::PeerJoined(peer));
                }
                Some(known) if known.addrs != *addrs => {
                    state.members.insert(*id, peer.clone());
                    changes.push(MembershipEvent::PeerAddressesChanged(peer));
                }
                Some(_) => {}
            }
        }

        let vanished: Vec<PeerId> = state
            .members
            .keys()
            .filter(|id| **id != self.self_id && !resolved.contains_key(id))
            .copied()
            .collect();
        for id in vanished {
            state.members.remove(&id);
            changes.push(MembershipEvent::PeerLeft(id));
        }
        changes
    }

    /// Mirror member changes into the ring and announce them
    fn apply(&self, changes: Vec<MembershipEvent>) {
        if changes.is_empty() {
            return;
        }
        for change in changes {
            match &change {
                MembershipEvent::PeerJoined(peer) => {
                    debug!(collaboration = %self.collaboration, peer = %peer.id, "peer joined");
                    self.ring.add(peer.clone());
                }
                MembershipEvent::PeerAddressesChanged(peer) => {
                    debug!(
                        collaboration = %self.collaboration,
                        peer = %peer.id,
                        "peer addresses changed"
                    );
                    if !self.ring.update_addresses(peer.clone()) {
                        self.ring.add(peer.clone());
                    }
                }
                MembershipEvent::PeerLeft(id) => {
                    debug!(collaboration = %self.collaboration, peer = %id, "peer left");
                    self.ring.remove(id);
                }
                MembershipEvent::Changed => {}
            }
            self.emit(change);
        }
        self.emit(MembershipEvent::Changed);
    }

    fn evict(&self, peer: &PeerInfo) {
        let removed = {
            let mut state = self.state.lock();
            if state.phase != MembershipPhase::Active {
                return;
            }
            let key = peer.id.to_base58();
            let tombstone = state.crdt.remove(&key);
            state.crdt.join(&tombstone);
            state.members.remove(&peer.id).is_some()
        };
        info!(collaboration = %self.collaboration, peer = %peer.id, "evicted unreachable member");
        if removed {
            self.emit(MembershipEvent::PeerLeft(peer.id));
            self.emit(MembershipEvent::Changed);
        }
    }

    async fn gossip_now(&self) -> DiasResult<()> {
        let (full, digest) = {
            let mut state = self.state.lock();
            if state.phase != MembershipPhase::Active {
                return Ok(());
            }
            let urgent = std::mem::replace(&mut state.urgent, false);
            let full = if urgent {
                state.ensure_self();
                Some(dias_wire::encode(&state.crdt)?)
            } else {
                None
            };
            (full, state.digest()?)
        };

        if let Some(bytes) = full {
            let message = GossipMessage::full(&self.collaboration, bytes, &self.type_name);
            self.gossip.broadcast(message.encode()?).await?;
            debug!(collaboration = %self.collaboration, "published full membership");
        }
        let message = GossipMessage::summary(&self.collaboration, digest, &self.type_name);
        self.gossip.broadcast(message.encode()?).await
    }
}

async fn eviction_listener(
    inner: Weak<MembershipInner>,
    mut evictions: mpsc::UnboundedReceiver<PeerInfo>,
) {
    while let Some(peer) = evictions.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.evict(&peer);
    }
}

async fn gossip_ticker(inner: Weak<MembershipInner>) {
    let mut heuristic = match inner.upgrade() {
        Some(inner) => GossipHeuristic::new(
            inner.config.gossip_interval_min,
            inner.config.gossip_interval_max,
        ),
        None => return,
    };
    loop {
        let urgent = {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let urgent = inner.state.lock().urgent;
            if let Err(e) = inner.gossip_now().await {
                warn!(collaboration = %inner.collaboration, error = %e, "membership gossip failed");
            }
            urgent
        };
        tokio::time::sleep(heuristic.next_interval(urgent)).await;
    }
}

impl Drop for MembershipInner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
