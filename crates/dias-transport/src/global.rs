//! Global connection manager
//!
//! Several collaborations may share one physical connection to a peer. Each
//! protocol stream opened through this manager is a claim on that
//! connection, counted per `(peer, protocol)`. The connection is only hung
//! up when nobody needs it anymore:
//! - no protocol claims it
//! - the remote did not dial us (no inbound side)
//! - the application layer does not hold it as an outbound connection

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use dias_core::{DiasResult, PeerId, PeerInfo};

use crate::{Connection, PeerSet, ProtocolHandler, Transport, TransportEvent, CONNECTION_BUFFER};

/// Resolves once a managed protocol stream has ended
pub struct ConnectionClosed {
    rx: oneshot::Receiver<()>,
}

impl ConnectionClosed {
    pub async fn wait(self) {
        let _ = self.rx.await;
    }
}

/// Single arbiter of physical connection teardown
#[derive(Clone)]
pub struct GlobalConnectionManager {
    inner: Arc<GlobalInner>,
}

struct GlobalInner {
    transport: Arc<dyn Transport>,
    /// Peers the application layer keeps connected
    app_outbound: PeerSet,
    inbound: PeerSet,
    claims: Mutex<HashMap<PeerId, HashSet<String>>>,
    events_task: Mutex<Option<JoinHandle<()>>>,
}

impl GlobalConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, app_outbound: PeerSet) -> Self {
        GlobalConnectionManager {
            inner: Arc::new(GlobalInner {
                transport,
                app_outbound,
                inbound: PeerSet::new(),
                claims: Mutex::new(HashMap::new()),
                events_task: Mutex::new(None),
            }),
        }
    }

    /// Start tracking inbound connections
    pub fn start(&self) {
        let mut events = self.inner.transport.events();
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TransportEvent::PeerConnected { peer, inbound: true }) => {
                        inner.inbound.insert(peer);
                    }
                    Ok(TransportEvent::PeerDisconnected(peer)) => {
                        inner.inbound.remove(&peer.id);
                        inner.claims.lock().remove(&peer.id);
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "connection manager lagged behind transport events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        if let Some(previous) = self.inner.events_task.lock().replace(task) {
            previous.abort();
        }
    }

    pub fn stop(&self) {
        if let Some(task) = self.inner.events_task.lock().take() {
            task.abort();
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub fn inbound(&self) -> &PeerSet {
        &self.inner.inbound
    }

    /// Open a protocol stream and claim the connection for `protocol`
    pub async fn connect(
        &self,
        peer: &PeerInfo,
        protocol: &str,
    ) -> DiasResult<(Connection, ConnectionClosed)> {
        self.claim(peer.id, protocol);
        let raw = match self.inner.transport.dial_protocol(peer, protocol).await {
            Ok(conn) => conn,
            Err(e) => {
                self.release(&peer.id, protocol);
                return Err(e);
            }
        };

        let remote = raw.remote();
        let (sink, mut raw_source) = raw.split();
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER);
        let (closed_tx, closed_rx) = oneshot::channel();
        let manager = self.clone();
        let protocol = protocol.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = raw_source.recv() => match message {
                        Some(message) => {
                            if tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = tx.closed() => break,
                }
            }
            debug!(peer = %remote, protocol = %protocol, "protocol stream ended");
            manager.release(&remote, &protocol);
            manager.maybe_hang_up(&remote).await;
            let _ = closed_tx.send(());
        });

        Ok((Connection::from_parts(remote, sink, rx), ConnectionClosed { rx: closed_rx }))
    }

    /// Drop the claim of `protocol` on a peer and hang up if possible
    pub async fn disconnect(&self, peer: &PeerId, protocol: &str) {
        self.release(peer, protocol);
        self.maybe_hang_up(peer).await;
    }

    /// Hang up the peer unless something still needs the connection.
    /// Returns true if the connection was closed.
    pub async fn maybe_hang_up(&self, peer: &PeerId) -> bool {
        if self.inner.inbound.contains(peer) || self.inner.app_outbound.contains(peer) {
            return false;
        }
        if self.claim_count(peer) > 0 {
            return false;
        }
        match self.inner.transport.hang_up(peer).await {
            Ok(()) => {
                debug!(peer = %peer, "hung up");
                true
            }
            Err(e) if e.is_benign() => false,
            Err(e) => {
                warn!(peer = %peer, error = %e, "hang up failed");
                false
            }
        }
    }

    pub fn handle(&self, protocol: &str, handler: ProtocolHandler) {
        self.inner.transport.handle(protocol, handler);
    }

    pub fn unhandle(&self, protocol: &str) {
        self.inner.transport.unhandle(protocol);
    }

    /// Number of protocols currently claiming a peer
    pub fn claim_count(&self, peer: &PeerId) -> usize {
        self.inner.claims.lock().get(peer).map(HashSet::len).unwrap_or(0)
    }

    fn claim(&self, peer: PeerId, protocol: &str) {
        self.inner
            .claims
            .lock()
            .entry(peer)
            .or_default()
            .insert(protocol.to_string());
    }

    fn release(&self, peer: &PeerId, protocol: &str) {
        let mut claims = self.inner.claims.lock();
        if let Some(protocols) = claims.get_mut(peer) {
            protocols.remove(protocol);
            if protocols.is_empty() {
                claims.remove(peer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryNetwork;
    use std::time::Duration;

    fn info(n: u8) -> PeerInfo {
        PeerInfo::new(PeerId::from_bytes([n; 32])).with_addr(format!("/memory/{}", n))
    }

    fn sink_handler() -> ProtocolHandler {
        Arc::new(|_peer: PeerInfo, conn: Connection| {
            tokio::spawn(async move {
                let (_sink, mut source) = conn.split();
                while source.recv().await.is_some() {}
            });
        })
    }

    #[tokio::test]
    async fn test_hang_up_only_when_unclaimed() {
        let net = MemoryNetwork::new();
        let a = net.add_node(info(1));
        let b = net.add_node(info(2));
        b.handle("/p1", sink_handler());
        b.handle("/p2", sink_handler());

        let gcm = GlobalConnectionManager::new(a.clone(), PeerSet::new());
        let (_c1, _) = gcm.connect(&info(2), "/p1").await.unwrap();
        let (_c2, _) = gcm.connect(&info(2), "/p2").await.unwrap();
        assert_eq!(gcm.claim_count(&info(2).id), 2);

        gcm.disconnect(&info(2).id, "/p1").await;
        assert!(net.is_linked(&info(1).id, &info(2).id));

        gcm.disconnect(&info(2).id, "/p2").await;
        assert!(!net.is_linked(&info(1).id, &info(2).id));
    }

    #[tokio::test]
    async fn test_app_outbound_keeps_connection() {
        let net = MemoryNetwork::new();
        let a = net.add_node(info(1));
        let b = net.add_node(info(2));
        b.handle("/p", sink_handler());

        let app_outbound = PeerSet::new();
        app_outbound.insert(info(2));
        let gcm = GlobalConnectionManager::new(a.clone(), app_outbound);
        gcm.connect(&info(2), "/p").await.unwrap();
        gcm.disconnect(&info(2).id, "/p").await;
        assert!(net.is_linked(&info(1).id, &info(2).id));
    }

    #[tokio::test]
    async fn test_inbound_keeps_connection() {
        let net = MemoryNetwork::new();
        let a = net.add_node(info(1));
        let b = net.add_node(info(2));
        let gcm = GlobalConnectionManager::new(a.clone(), PeerSet::new());
        gcm.start();

        b.dial(&info(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(gcm.inbound().contains(&info(2).id));
        assert!(!gcm.maybe_hang_up(&info(2).id).await);
        gcm.stop();
    }

    #[tokio::test]
    async fn test_stream_end_releases_claim() {
        let net = MemoryNetwork::new();
        let a = net.add_node(info(1));
        let b = net.add_node(info(2));
        b.handle("/p", sink_handler());

        let gcm = GlobalConnectionManager::new(a.clone(), PeerSet::new());
        let (conn, closed) = gcm.connect(&info(2), "/p").await.unwrap();
        drop(conn);
        tokio::time::timeout(Duration::from_secs(1), closed.wait())
            .await
            .unwrap();
        assert_eq!(gcm.claim_count(&info(2).id), 0);
        assert!(!net.is_linked(&info(1).id, &info(2).id));
    }

    #[tokio::test]
    async fn test_failed_connect_releases_claim() {
        let net = MemoryNetwork::new();
        let a = net.add_node(info(1));
        let gcm = GlobalConnectionManager::new(a.clone(), PeerSet::new());
        assert!(gcm.connect(&info(9), "/p").await.is_err());
        assert_eq!(gcm.claim_count(&info(9).id), 0);
    }
}
