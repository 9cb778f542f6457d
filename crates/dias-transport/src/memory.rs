//! In-process network
//!
//! `MemoryNetwork` connects any number of `MemoryTransport` nodes living in
//! the same process. It implements `Transport` and `PubSub` faithfully
//! enough to run whole swarms in tests: physical links, protocol handlers,
//! connection events, topic subscriptions and unreachable peers.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use dias_core::{DiasError, DiasResult, PeerId, PeerInfo};

use crate::{Connection, ProtocolHandler, PubSub, PubSubMessage, Transport, TransportEvent};

const EVENT_CAPACITY: usize = 256;

struct NodeState {
    info: PeerInfo,
    handlers: HashMap<String, ProtocolHandler>,
    topics: HashMap<String, mpsc::UnboundedSender<PubSubMessage>>,
    events: broadcast::Sender<TransportEvent>,
}

#[derive(Default)]
struct NetworkState {
    nodes: HashMap<PeerId, NodeState>,
    /// Physical links, stored as (smaller id, larger id)
    links: BTreeSet<(PeerId, PeerId)>,
    unreachable: BTreeSet<PeerId>,
}

fn link_key(a: PeerId, b: PeerId) -> (PeerId, PeerId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// A simulated network shared by its nodes
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node to the network
    pub fn add_node(&self, info: PeerInfo) -> Arc<MemoryTransport> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        self.state.lock().nodes.insert(
            info.id,
            NodeState {
                info: info.clone(),
                handlers: HashMap::new(),
                topics: HashMap::new(),
                events,
            },
        );
        Arc::new(MemoryTransport {
            network: self.clone(),
            local: info,
        })
    }

    /// Detach a node, closing all its links
    pub fn remove_node(&self, id: &PeerId) {
        let linked: Vec<PeerId> = {
            let state = self.state.lock();
            state
                .links
                .iter()
                .filter_map(|(a, b)| {
                    if a == id {
                        Some(*b)
                    } else if b == id {
                        Some(*a)
                    } else {
                        None
                    }
                })
                .collect()
        };
        for other in linked {
            self.unlink(*id, other);
        }
        self.state.lock().nodes.remove(id);
    }

    /// Make dials to a peer fail (or succeed again)
    pub fn set_reachable(&self, id: &PeerId, reachable: bool) {
        let mut state = self.state.lock();
        if reachable {
            state.unreachable.remove(id);
        } else {
            state.unreachable.insert(*id);
        }
    }

    /// Let `to` learn about `peer` through the transport's discovery
    pub fn announce(&self, to: &PeerId, peer: PeerInfo) {
        if let Some(node) = self.state.lock().nodes.get(to) {
            let _ = node.events.send(TransportEvent::PeerDiscovered(peer));
        }
    }

    pub fn is_linked(&self, a: &PeerId, b: &PeerId) -> bool {
        self.state.lock().links.contains(&link_key(*a, *b))
    }

    pub fn link_count(&self) -> usize {
        self.state.lock().links.len()
    }

    fn link(&self, from: &PeerInfo, to: &PeerId) -> DiasResult<()> {
        let mut state = self.state.lock();
        if state.unreachable.contains(to) {
            return Err(DiasError::DialFailed {
                peer: *to,
                reason: "peer unreachable".into(),
            });
        }
        let remote = state.nodes.get(to).map(|n| (n.info.clone(), n.events.clone()));
        let (remote_info, remote_events) = remote.ok_or_else(|| DiasError::DialFailed {
            peer: *to,
            reason: "no such peer".into(),
        })?;

        if !state.links.insert(link_key(from.id, *to)) {
            return Ok(());
        }
        debug!(from = %from.id, to = %to, "memory link up");
        if let Some(local) = state.nodes.get(&from.id) {
            let _ = local.events.send(TransportEvent::PeerConnected {
                peer: remote_info,
                inbound: false,
            });
        }
        let _ = remote_events.send(TransportEvent::PeerConnected {
            peer: from.clone(),
            inbound: true,
        });
        Ok(())
    }

    fn unlink(&self, a: PeerId, b: PeerId) {
        let mut state = self.state.lock();
        if !state.links.remove(&link_key(a, b)) {
            return;
        }
        debug!(a = %a, b = %b, "memory link down");
        let a_info = state.nodes.get(&a).map(|n| n.info.clone());
        let b_info = state.nodes.get(&b).map(|n| n.info.clone());
        if let (Some(node), Some(info)) = (state.nodes.get(&a), b_info) {
            let _ = node.events.send(TransportEvent::PeerDisconnected(info));
        }
        if let (Some(node), Some(info)) = (state.nodes.get(&b), a_info) {
            let _ = node.events.send(TransportEvent::PeerDisconnected(info));
        }
    }
}

/// One node of a `MemoryNetwork`
pub struct MemoryTransport {
    network: MemoryNetwork,
    local: PeerInfo,
}

impl MemoryTransport {
    pub fn local_info(&self) -> &PeerInfo {
        &self.local
    }

    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn local_peer(&self) -> DiasResult<PeerInfo> {
        Ok(self.local.clone())
    }

    async fn dial(&self, peer: &PeerInfo) -> DiasResult<()> {
        self.network.link(&self.local, &peer.id)
    }

    async fn dial_protocol(&self, peer: &PeerInfo, protocol: &str) -> DiasResult<Connection> {
        self.network.link(&self.local, &peer.id)?;
        let handler = {
            let state = self.network.state.lock();
            state
                .nodes
                .get(&peer.id)
                .and_then(|n| n.handlers.get(protocol).cloned())
        };
        let handler = handler.ok_or_else(|| DiasError::NoHandler(protocol.to_string()))?;

        let (local_end, remote_end) = Connection::pair(self.local.id, peer.id);
        handler(self.local.clone(), remote_end);
        Ok(local_end)
    }

    async fn hang_up(&self, peer: &PeerId) -> DiasResult<()> {
        self.network.unlink(self.local.id, *peer);
        Ok(())
    }

    fn handle(&self, protocol: &str, handler: ProtocolHandler) {
        if let Some(node) = self.network.state.lock().nodes.get_mut(&self.local.id) {
            node.handlers.insert(protocol.to_string(), handler);
        }
    }

    fn unhandle(&self, protocol: &str) {
        if let Some(node) = self.network.state.lock().nodes.get_mut(&self.local.id) {
            node.handlers.remove(protocol);
        }
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        let state = self.network.state.lock();
        match state.nodes.get(&self.local.id) {
            Some(node) => node.events.subscribe(),
            // detached node: already closed
            None => broadcast::channel(1).1,
        }
    }
}

#[async_trait]
impl PubSub for MemoryTransport {
    async fn subscribe(&self, topic: &str) -> DiasResult<mpsc::UnboundedReceiver<PubSubMessage>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.network.state.lock();
        let node = state
            .nodes
            .get_mut(&self.local.id)
            .ok_or_else(|| DiasError::Transport("node detached from network".into()))?;
        node.topics.insert(topic.to_string(), tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, topic: &str) -> DiasResult<()> {
        if let Some(node) = self.network.state.lock().nodes.get_mut(&self.local.id) {
            node.topics.remove(topic);
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> DiasResult<()> {
        let state = self.network.state.lock();
        for node in state.nodes.values() {
            if let Some(tx) = node.topics.get(topic) {
                let _ = tx.send(PubSubMessage {
                    from: self.local.id,
                    topic: topic.to_string(),
                    data: data.clone(),
                });
            }
        }
        Ok(())
    }

    async fn peers(&self, topic: &str) -> DiasResult<Vec<PeerId>> {
        let state = self.network.state.lock();
        Ok(state
            .nodes
            .iter()
            .filter(|(id, node)| {
                **id != self.local.id
                    && state.links.contains(&link_key(self.local.id, **id))
                    && node.topics.contains_key(topic)
            })
            .map(|(id, _)| *id)
            .collect())
    }
}
