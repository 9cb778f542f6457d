//! Application transport
//!
//! Wires the application-wide pieces together: the application ring, the
//! global connection manager, discovery feeding the ring, the app-level
//! connection manager keeping the Dias set connected, and gossip on the
//! application topic. Collaborations are built on top of it.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use dias_core::{DiasResult, PeerInfo};
use dias_ring::{DiasSet, Ring, RingConfig};

use crate::{
    AppConnectionManager, ConnectionManagerConfig, Discovery, DiscoveryConfig,
    GlobalConnectionManager,
    Gossip, PeerSet, PubSub, Transport, TransportEvent,
};

const EVENT_CAPACITY: usize = 256;

/// Application transport settings
#[derive(Clone, Debug)]
pub struct AppTransportConfig {
    pub app_topic: String,
    pub ring: RingConfig,
    pub discovery: DiscoveryConfig,
    pub connections: ConnectionManagerConfig,
}

impl AppTransportConfig {
    pub fn new(app_name: &str) -> Self {
        Self {
            app_topic: format!("dias/app/{}", app_name),
            ring: RingConfig::default(),
            discovery: DiscoveryConfig::default(),
            connections: ConnectionManagerConfig::default(),
        }
    }

    pub fn with_ring(mut self, ring: RingConfig) -> Self {
        self.ring = ring;
        self
    }

    pub fn with_discovery(mut self, discovery: DiscoveryConfig) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_connections(mut self, connections: ConnectionManagerConfig) -> Self {
        self.connections = connections;
        self
    }
}

/// Connection changes seen at the application level
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppTransportEvent {
    PeerConnected { peer: PeerInfo, inbound: bool },
    PeerDisconnected(PeerInfo),
    PeerEvicted(PeerInfo),
}

/// Application-wide connectivity
pub struct AppTransport {
    local: PeerInfo,
    config: AppTransportConfig,
    transport: Arc<dyn Transport>,
    ring: Ring,
    inbound: PeerSet,
    outbound: PeerSet,
    gcm: GlobalConnectionManager,
    discovery: Discovery,
    connections: AppConnectionManager,
    gossip: Gossip,
    events: broadcast::Sender<AppTransportEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    evictions: Mutex<Option<mpsc::UnboundedReceiver<PeerInfo>>>,
}

impl AppTransport {
    /// Waits for the transport's local peer info
    pub async fn new(
        transport: Arc<dyn Transport>,
        pubsub: Arc<dyn PubSub>,
        config: AppTransportConfig,
    ) -> DiasResult<Self> {
        let local = transport.local_peer().await?;
        let ring = Ring::new(config.ring.preamble_byte_count);
        let outbound = PeerSet::new();
        let gcm = GlobalConnectionManager::new(Arc::clone(&transport), outbound.clone());
        let discovery = Discovery::new(
            ring.clone(),
            Arc::clone(&transport),
            Arc::clone(&pubsub),
            config.app_topic.clone(),
            config.discovery.clone(),
        );
        let (evict_tx, evict_rx) = mpsc::unbounded_channel();
        let connections = AppConnectionManager::with_evictions(
            ring.clone(),
            DiasSet::new(local.id, &config.ring),
            gcm.clone(),
            outbound.clone(),
            config.connections.clone(),
            evict_tx,
        );
        let gossip = Gossip::new(pubsub, config.app_topic.clone());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(AppTransport {
            local,
            config,
            transport,
            ring,
            inbound: PeerSet::new(),
            outbound,
            gcm,
            discovery,
            connections,
            gossip,
            events,
            tasks: Mutex::new(Vec::new()),
            evictions: Mutex::new(Some(evict_rx)),
        })
    }

    pub fn start(&self) {
        self.gcm.start();
        self.discovery.start();
        self.connections.start();

        let mut transport_events = self.transport.events();
        let inbound = self.inbound.clone();
        let outbound = self.outbound.clone();
        let discovery = self.discovery.clone();
        let events = self.events.clone();
        let event_loop = tokio::spawn(async move {
            loop {
                match transport_events.recv().await {
                    Ok(TransportEvent::PeerConnected { peer, inbound: true }) => {
                        inbound.insert(peer.clone());
                        let _ = events.send(AppTransportEvent::PeerConnected {
                            peer,
                            inbound: true,
                        });
                    }
                    Ok(TransportEvent::PeerConnected { peer, inbound: false }) => {
                        let _ = events.send(AppTransportEvent::PeerConnected {
                            peer,
                            inbound: false,
                        });
                    }
                    Ok(TransportEvent::PeerDisconnected(peer)) => {
                        inbound.remove(&peer.id);
                        outbound.remove(&peer.id);
                        let _ = events.send(AppTransportEvent::PeerDisconnected(peer));
                    }
                    Ok(TransportEvent::PeerDiscovered(peer)) => {
                        discovery.peer_discovered(peer);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "app transport lagged behind transport events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut tasks = vec![event_loop];
        if let Some(mut evictions) = self.evictions.lock().take() {
            let events = self.events.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(peer) = evictions.recv().await {
                    let _ = events.send(AppTransportEvent::PeerEvicted(peer));
                }
            }));
        }
        self.tasks.lock().extend(tasks);
        info!(peer = %self.local.id, topic = %self.config.app_topic, "app transport started");
    }

    pub async fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.discovery.stop();
        self.connections.stop().await;
        self.gcm.stop();
        if let Err(e) = self.gossip.stop().await {
            debug!(error = %e, "gossip unsubscribe failed");
        }
        info!(peer = %self.local.id, "app transport stopped");
    }

    pub fn local_peer(&self) -> &PeerInfo {
        &self.local
    }

    pub fn config(&self) -> &AppTransportConfig {
        &self.config
    }

    pub fn ring(&self) -> &Ring {
        &self.ring
    }

    pub fn gcm(&self) -> &GlobalConnectionManager {
        &self.gcm
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn gossip(&self) -> &Gossip {
        &self.gossip
    }

    pub fn connections(&self) -> &AppConnectionManager {
        &self.connections
    }

    pub fn inbound(&self) -> &PeerSet {
        &self.inbound
    }

    pub fn outbound(&self) -> &PeerSet {
        &self.outbound
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppTransportEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryNetwork;
    use dias_core::PeerId;
    use std::time::Duration;

    fn info(n: u8) -> PeerInfo {
        PeerInfo::new(PeerId::from_bytes([n; 32])).with_addr(format!("/memory/{}", n))
    }

    fn fast_config() -> AppTransportConfig {
        AppTransportConfig::new("test")
            .with_discovery(
                DiscoveryConfig::default()
                    .with_max_throttle_delay(Duration::from_millis(5))
                    .with_poll_interval(Duration::from_millis(10))
                    .with_poll_timeout(Duration::from_millis(50)),
            )
            .with_connections(
                ConnectionManagerConfig::default().with_debounce(Duration::from_millis(10)),
            )
    }

    #[tokio::test]
    async fn test_discovered_peer_joins_ring_and_gets_connected() {
        let net = MemoryNetwork::new();
        let a = net.add_node(info(1));
        let b = net.add_node(info(2));

        let app_a = AppTransport::new(a.clone(), a.clone(), fast_config()).await.unwrap();
        let app_b = AppTransport::new(b.clone(), b.clone(), fast_config()).await.unwrap();
        let _ga = app_a.gossip().start().await.unwrap();
        let _gb = app_b.gossip().start().await.unwrap();
        app_a.start();
        app_b.start();
        let mut events_b = app_b.subscribe();

        net.announce(&info(1).id, info(2));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(app_a.ring().has(&info(2).id));
        assert!(app_a.outbound().contains(&info(2).id));
        assert!(app_b.inbound().contains(&info(1).id));
        assert_eq!(
            events_b.recv().await.unwrap(),
            AppTransportEvent::PeerConnected { peer: info(1), inbound: true }
        );

        app_a.stop().await;
        app_b.stop().await;
    }

    #[tokio::test]
    async fn test_disconnect_keeps_ring_membership() {
        let net = MemoryNetwork::new();
        let a = net.add_node(info(1));
        net.add_node(info(2));

        let app_a = AppTransport::new(a.clone(), a.clone(), fast_config()).await.unwrap();
        app_a.start();
        app_a.ring().add(info(2));
        app_a.connections().reset_connections().await;
        assert!(app_a.outbound().contains(&info(2).id));

        net.remove_node(&info(2).id);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!app_a.outbound().contains(&info(2).id));
        assert!(app_a.ring().has(&info(2).id));
        app_a.stop().await;
    }
}
