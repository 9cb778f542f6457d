//! Collaboration-level connection manager
//!
//! Keeps one replication stream open to every peer of the collaboration's
//! Dias set. Outbound streams go through the global connection manager so
//! the physical connection is shared with other collaborations; each one
//! runs the pushing end of the protocol. Inbound streams run the pulling
//! end, and their peer joins the collaboration ring.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use dias_core::{DiasError, DiasResult, PeerId, PeerInfo, VectorClock};
use dias_crypto::CollaborationKeys;
use dias_protocol::{Protocol, ProtocolEvent, Session};
use dias_ring::{DiasSet, Ring};
use dias_transport::{
    Connection, ConnectionDriver, ConnectionManagerConfig, GlobalConnectionManager, PeerSet,
    ProtocolHandler, ReconcileLoop, ReconcileReport, Reconciler,
};

const EVENT_CAPACITY: usize = 256;

/// Replication stream lifecycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected { peer: PeerId, inbound: bool },
    Disconnected { peer: PeerId, inbound: bool },
}

/// Receives connection activity of one collaboration
pub trait ConnectionObserver: Send + Sync {
    fn peers_changed(&self, inbound: &[PeerId], outbound: &[PeerId]);
    fn inbound_message(&self, peer: PeerId, size: usize);
    fn outbound_message(&self, peer: PeerId, size: usize);
}

/// Stops notifying its observer when dropped
pub struct ObserverGuard {
    task: JoinHandle<()>,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct CollaborationDriver {
    gcm: GlobalConnectionManager,
    protocol: Arc<Protocol>,
    outbound: PeerSet,
    /// Push session per peer, tagged so a stale close cannot drop a newer one
    sessions: Arc<Mutex<HashMap<PeerId, (u64, Session)>>>,
    generation: AtomicU64,
    events: broadcast::Sender<ConnectionEvent>,
}

#[async_trait]
impl ConnectionDriver for CollaborationDriver {
    async fn connect(&self, peer: &PeerInfo) -> DiasResult<()> {
        let (conn, closed) = self.gcm.connect(peer, self.protocol.name()).await?;
        let id = peer.id;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let session = self.protocol.dialer_for(id, conn);
        if let Some((_, previous)) = self.sessions.lock().insert(id, (generation, session)) {
            previous.close();
        }
        self.outbound.insert(peer.clone());
        debug!(peer = %id, protocol = %self.protocol.name(), "replication stream opened");
        let _ = self.events.send(ConnectionEvent::Connected { peer: id, inbound: false });

        let sessions = Arc::clone(&self.sessions);
        let outbound = self.outbound.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            closed.wait().await;
            let current = {
                let mut sessions = sessions.lock();
                match sessions.get(&id) {
                    Some((g, _)) if *g == generation => sessions.remove(&id).is_some(),
                    _ => false,
                }
            };
            if current && outbound.remove(&id).is_some() {
                debug!(peer = %id, "replication stream closed");
                let _ = events.send(ConnectionEvent::Disconnected { peer: id, inbound: false });
            }
        });
        Ok(())
    }

    async fn disconnect(&self, peer: &PeerInfo) {
        let session = self.sessions.lock().remove(&peer.id);
        if let Some((_, session)) = session {
            // the session releases the peer's clock and reports the close
            session.close();
        }
        if self.outbound.remove(&peer.id).is_some() {
            let _ = self.events.send(ConnectionEvent::Disconnected {
                peer: peer.id,
                inbound: false,
            });
        }
        self.gcm.disconnect(&peer.id, self.protocol.name()).await;
    }

    fn outbound(&self) -> Vec<PeerInfo> {
        self.outbound.values()
    }
}

/// Reconciles a collaboration ring's Dias set against replication streams
pub struct CollaborationConnectionManager {
    reconciler: Arc<Reconciler>,
    driver: Arc<CollaborationDriver>,
    inbound: PeerSet,
    keys: Arc<CollaborationKeys>,
    config: ConnectionManagerConfig,
    running: Mutex<Option<ReconcileLoop>>,
}

impl CollaborationConnectionManager {
    /// Evicted peers are reported on `evictions`. Without keys nothing could
    /// be replicated, so the manager refuses to exist.
    pub fn new(
        ring: Ring,
        dias: DiasSet,
        gcm: GlobalConnectionManager,
        protocol: Arc<Protocol>,
        keys: Option<Arc<CollaborationKeys>>,
        config: ConnectionManagerConfig,
        evictions: mpsc::UnboundedSender<PeerInfo>,
    ) -> DiasResult<Self> {
        let keys = keys.ok_or_else(|| {
            DiasError::Config("collaboration connection manager needs keys".into())
        })?;
        let reconciler =
            Reconciler::new(ring, dias, config.max_unreachable_before_eviction)
                .with_evictions(evictions);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(CollaborationConnectionManager {
            reconciler: Arc::new(reconciler),
            driver: Arc::new(CollaborationDriver {
                gcm,
                protocol,
                outbound: PeerSet::new(),
                sessions: Arc::new(Mutex::new(HashMap::new())),
                generation: AtomicU64::new(0),
                events,
            }),
            inbound: PeerSet::new(),
            keys,
            config,
            running: Mutex::new(None),
        })
    }

    /// Accept inbound streams and start reconciling
    pub fn start(&self) {
        let protocol = &self.driver.protocol;
        self.driver.gcm.handle(protocol.name(), self.inbound_handler());
        let driver: Arc<dyn ConnectionDriver> = self.driver.clone();
        let running = ReconcileLoop::spawn(Arc::clone(&self.reconciler), driver, &self.config);
        *self.running.lock() = Some(running);
        info!(protocol = %protocol.name(), "collaboration connections started");
    }

    pub async fn stop(&self) {
        if self.running.lock().take().is_none() {
            return;
        }
        self.driver.gcm.unhandle(self.driver.protocol.name());
        for peer in self.driver.outbound.values() {
            self.driver.disconnect(&peer).await;
        }
        info!(protocol = %self.driver.protocol.name(), "collaboration connections stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Run one reconciliation pass now
    pub async fn reset_connections(&self) -> ReconcileReport {
        self.reconciler.reconcile(self.driver.as_ref()).await
    }

    pub fn ring(&self) -> &Ring {
        self.reconciler.ring()
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.driver.protocol
    }

    pub fn keys(&self) -> &Arc<CollaborationKeys> {
        &self.keys
    }

    pub fn outbound_connection_count(&self) -> usize {
        self.driver.outbound.len()
    }

    pub fn outbound_connected_peers(&self) -> Vec<PeerId> {
        self.driver.outbound.ids()
    }

    pub fn inbound_connection_count(&self) -> usize {
        self.inbound.len()
    }

    pub fn inbound_connected_peers(&self) -> Vec<PeerId> {
        self.inbound.ids()
    }

    /// Last clock exchanged with `peer` on an open stream
    pub fn vector_clock(&self, peer: &PeerId) -> VectorClock {
        self.driver.protocol.clocks().get_for(peer)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.driver.events.subscribe()
    }

    /// Report peer sets and message sizes to `observer` until the guard drops
    pub fn observe(&self, observer: Arc<dyn ConnectionObserver>) -> ObserverGuard {
        let mut connections = self.driver.events.subscribe();
        let mut messages = self.driver.protocol.subscribe();
        let inbound = self.inbound.clone();
        let outbound = self.driver.outbound.clone();
        observer.peers_changed(&inbound.ids(), &outbound.ids());

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = connections.recv() => match event {
                        Ok(_) | Err(RecvError::Lagged(_)) => {
                            observer.peers_changed(&inbound.ids(), &outbound.ids());
                        }
                        Err(RecvError::Closed) => break,
                    },
                    event = messages.recv() => match event {
                        Ok(ProtocolEvent::InboundMessage { peer, size }) => {
                            observer.inbound_message(peer, size)
                        }
                        Ok(ProtocolEvent::OutboundMessage { peer, size }) => {
                            observer.outbound_message(peer, size)
                        }
                        Ok(_) | Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });
        ObserverGuard { task }
    }

    fn inbound_handler(&self) -> ProtocolHandler {
        let ring = self.reconciler.ring().clone();
        let inbound = self.inbound.clone();
        let protocol = Arc::clone(&self.driver.protocol);
        let events = self.driver.events.clone();
        Arc::new(move |peer: PeerInfo, conn: Connection| {
            let id = peer.id;
            inbound.insert(peer.clone());
            if !ring.has(&id) {
                ring.add(peer);
            }
            debug!(peer = %id, protocol = %protocol.name(), "inbound replication stream");
            let _ = events.send(ConnectionEvent::Connected { peer: id, inbound: true });

            let session = protocol.accept(id, conn);
            let inbound = inbound.clone();
            let events = events.clone();
            tokio::spawn(async move {
                session.join().await;
                inbound.remove(&id);
                let _ = events.send(ConnectionEvent::Disconnected { peer: id, inbound: true });
            });
        })
    }
}

impl std::fmt::Debug for CollaborationConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaborationConnectionManager")
            .field("protocol", &self.driver.protocol.name())
            .field("outbound", &self.driver.outbound)
            .field("inbound", &self.inbound)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dias_protocol::ProtocolConfig;
    use dias_ring::RingConfig;
    use dias_store::{CollaborationStore, MemoryKv, StoreConfig};
    use dias_transport::{MemoryNetwork, MemoryTransport};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn info(n: u8) -> PeerInfo {
        PeerInfo::new(PeerId::from_bytes([n; 32])).with_addr(format!("/memory/{}", n))
    }

    struct Node {
        ring: Ring,
        manager: CollaborationConnectionManager,
        _evictions: mpsc::UnboundedReceiver<PeerInfo>,
    }

    async fn node(transport: &Arc<MemoryTransport>, n: u8, keys: &Arc<CollaborationKeys>) -> Node {
        let store = CollaborationStore::new(
            info(n).id,
            "doc",
            Arc::new(MemoryKv::new()),
            Some(keys.cipher()),
            StoreConfig::default(),
        );
        store.start().await.unwrap();
        let protocol = Protocol::new(info(n).id, "doc", store, ProtocolConfig::default());
        let ring = Ring::new(2);
        let gcm = GlobalConnectionManager::new(transport.clone(), PeerSet::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = CollaborationConnectionManager::new(
            ring.clone(),
            DiasSet::new(info(n).id, &RingConfig::default()),
            gcm,
            protocol,
            Some(Arc::clone(keys)),
            ConnectionManagerConfig::default().with_interval(Duration::from_secs(60)),
            tx,
        )
        .unwrap();
        Node {
            ring,
            manager,
            _evictions: rx,
        }
    }

    #[tokio::test]
    async fn test_requires_keys() {
        let net = MemoryNetwork::new();
        let a = net.add_node(info(1));
        let keys = Arc::new(CollaborationKeys::generate());
        let store = CollaborationStore::new(
            info(1).id,
            "doc",
            Arc::new(MemoryKv::new()),
            Some(keys.cipher()),
            StoreConfig::default(),
        );
        let protocol = Protocol::new(info(1).id, "doc", store, ProtocolConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = CollaborationConnectionManager::new(
            Ring::new(2),
            DiasSet::new(info(1).id, &RingConfig::default()),
            GlobalConnectionManager::new(a, PeerSet::new()),
            protocol,
            None,
            ConnectionManagerConfig::default(),
            tx,
        );
        assert!(matches!(result, Err(DiasError::Config(_))));
    }

    #[tokio::test]
    async fn test_outbound_stream_makes_remote_admit_us() {
        let net = MemoryNetwork::new();
        let ta = net.add_node(info(1));
        let tb = net.add_node(info(2));
        let keys = Arc::new(CollaborationKeys::generate());
        let a = node(&ta, 1, &keys).await;
        let b = node(&tb, 2, &keys).await;
        b.manager.start();
        let mut b_events = b.manager.subscribe();

        a.ring.add(info(2));
        let report = a.manager.reset_connections().await;
        assert_eq!(report.connected, vec![info(2).id]);
        assert_eq!(a.manager.outbound_connected_peers(), vec![info(2).id]);

        let event = tokio::time::timeout(Duration::from_secs(1), b_events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, ConnectionEvent::Connected { peer: info(1).id, inbound: true });
        assert!(b.ring.has(&info(1).id));
        assert_eq!(b.manager.inbound_connected_peers(), vec![info(1).id]);

        b.manager.stop().await;
    }

    #[tokio::test]
    async fn test_leaving_dias_set_closes_stream() {
        let net = MemoryNetwork::new();
        let ta = net.add_node(info(1));
        let tb = net.add_node(info(2));
        let keys = Arc::new(CollaborationKeys::generate());
        let a = node(&ta, 1, &keys).await;
        let b = node(&tb, 2, &keys).await;
        b.manager.start();

        a.ring.add(info(2));
        a.manager.reset_connections().await;
        let mut a_events = a.manager.subscribe();

        a.ring.remove(&info(2).id);
        let report = a.manager.reset_connections().await;
        assert_eq!(report.disconnected, vec![info(2).id]);
        assert_eq!(a.manager.outbound_connection_count(), 0);
        assert_eq!(
            a_events.recv().await.unwrap(),
            ConnectionEvent::Disconnected { peer: info(2).id, inbound: false }
        );

        // the pulling side notices the stream end
        for _ in 0..100 {
            if b.manager.inbound_connection_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(b.manager.inbound_connection_count(), 0);
        assert!(!net.is_linked(&info(1).id, &info(2).id));
        b.manager.stop().await;
    }

    #[tokio::test]
    async fn test_leaving_dias_set_releases_clock_tracking() {
        let net = MemoryNetwork::new();
        let ta = net.add_node(info(1));
        let tb = net.add_node(info(2));
        let keys = Arc::new(CollaborationKeys::generate());
        let a = node(&ta, 1, &keys).await;
        let b = node(&tb, 2, &keys).await;
        b.manager.start();
        let mut protocol_events = a.manager.protocol().subscribe();

        a.ring.add(info(2));
        a.manager.reset_connections().await;
        // the pulling side presents its clock right away
        for _ in 0..100 {
            if a.manager.protocol().clocks().knows(&info(2).id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(a.manager.protocol().clocks().knows(&info(2).id));

        a.ring.remove(&info(2).id);
        a.manager.reset_connections().await;
        let closed = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(ProtocolEvent::OutboundConnectionClosed(peer)) =
                    protocol_events.recv().await
                {
                    return peer;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(closed, info(2).id);
        assert!(!a.manager.protocol().clocks().knows(&info(2).id));
        assert_eq!(a.manager.vector_clock(&info(2).id), VectorClock::new());
        b.manager.stop().await;
    }

    #[derive(Default)]
    struct Counting {
        changes: AtomicUsize,
        inbound_bytes: AtomicUsize,
    }

    impl ConnectionObserver for Counting {
        fn peers_changed(&self, _inbound: &[PeerId], _outbound: &[PeerId]) {
            self.changes.fetch_add(1, Ordering::SeqCst);
        }

        fn inbound_message(&self, _peer: PeerId, size: usize) {
            self.inbound_bytes.fetch_add(size, Ordering::SeqCst);
        }

        fn outbound_message(&self, _peer: PeerId, _size: usize) {}
    }

    #[tokio::test]
    async fn test_observer_sees_streams_until_dropped() {
        let net = MemoryNetwork::new();
        let ta = net.add_node(info(1));
        let tb = net.add_node(info(2));
        let keys = Arc::new(CollaborationKeys::generate());
        let a = node(&ta, 1, &keys).await;
        let b = node(&tb, 2, &keys).await;
        b.manager.start();

        let observer = Arc::new(Counting::default());
        let guard = a.manager.observe(observer.clone());
        assert_eq!(observer.changes.load(Ordering::SeqCst), 1);

        a.ring.add(info(2));
        a.manager.reset_connections().await;
        for _ in 0..100 {
            if observer.inbound_bytes.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // the puller presents its clock as soon as the stream opens
        assert!(observer.inbound_bytes.load(Ordering::SeqCst) > 0);
        assert!(observer.changes.load(Ordering::SeqCst) >= 2);

        drop(guard);
        tokio::task::yield_now().await;
        let seen = observer.changes.load(Ordering::SeqCst);
        a.ring.remove(&info(2).id);
        a.manager.reset_connections().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(observer.changes.load(Ordering::SeqCst), seen);
        b.manager.stop().await;
    }
}
