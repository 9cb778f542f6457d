//! Interfaces to the network stack
//!
//! - `Transport`: dialing, protocol streams, hang-up and connection events
//! - `PubSub`: topic subscription, publication and topic membership
//! - `Connection`: ordered, reliable message stream split into sink/source

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};

use dias_core::{DiasError, DiasResult, PeerId, PeerInfo};

/// Default buffer of a connection direction, in messages
pub const CONNECTION_BUFFER: usize = 64;

/// Connection-level notifications from the transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer was seen by the transport's own discovery mechanisms
    PeerDiscovered(PeerInfo),
    /// A physical connection opened. `inbound` is true if the remote dialed.
    PeerConnected { peer: PeerInfo, inbound: bool },
    /// A physical connection closed
    PeerDisconnected(PeerInfo),
}

/// Called for every inbound stream of a handled protocol
pub type ProtocolHandler = Arc<dyn Fn(PeerInfo, Connection) + Send + Sync>;

/// Dialing and stream multiplexing
#[async_trait]
pub trait Transport: Send + Sync {
    /// Local peer info. May wait until the transport is listening.
    async fn local_peer(&self) -> DiasResult<PeerInfo>;

    /// Open (or reuse) a physical connection
    async fn dial(&self, peer: &PeerInfo) -> DiasResult<()>;

    /// Open a protocol stream, dialing first if needed
    async fn dial_protocol(&self, peer: &PeerInfo, protocol: &str) -> DiasResult<Connection>;

    /// Close the physical connection to a peer
    async fn hang_up(&self, peer: &PeerId) -> DiasResult<()>;

    fn handle(&self, protocol: &str, handler: ProtocolHandler);

    fn unhandle(&self, protocol: &str);

    fn events(&self) -> broadcast::Receiver<TransportEvent>;
}

/// A message received on a topic
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PubSubMessage {
    pub from: PeerId,
    pub topic: String,
    pub data: Vec<u8>,
}

/// Topic based publish/subscribe
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn subscribe(&self, topic: &str) -> DiasResult<mpsc::UnboundedReceiver<PubSubMessage>>;

    async fn unsubscribe(&self, topic: &str) -> DiasResult<()>;

    async fn publish(&self, topic: &str, data: Vec<u8>) -> DiasResult<()>;

    /// Connected peers known to be subscribed to a topic
    async fn peers(&self, topic: &str) -> DiasResult<Vec<PeerId>>;
}

/// Writing half of a connection
#[derive(Clone, Debug)]
pub struct ConnectionSink {
    tx: mpsc::Sender<Bytes>,
}

impl ConnectionSink {
    pub async fn send(&self, message: impl Into<Bytes>) -> DiasResult<()> {
        self.tx.send(message.into()).await.map_err(|_| DiasError::StreamClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Reading half of a connection
#[derive(Debug)]
pub struct ConnectionSource {
    rx: mpsc::Receiver<Bytes>,
}

impl ConnectionSource {
    /// Next message, `None` once the remote sink is gone
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Stop accepting messages; the remote sink sees the stream closed
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// One end of a bidirectional message stream
#[derive(Debug)]
pub struct Connection {
    remote: PeerId,
    sink: ConnectionSink,
    source: ConnectionSource,
}

impl Connection {
    /// Two connected ends. `a` talks to `b_id`, `b` talks to `a_id`.
    pub fn pair(a_id: PeerId, b_id: PeerId) -> (Connection, Connection) {
        let (a_tx, a_rx) = mpsc::channel(CONNECTION_BUFFER);
        let (b_tx, b_rx) = mpsc::channel(CONNECTION_BUFFER);
        let a = Connection {
            remote: b_id,
            sink: ConnectionSink { tx: b_tx },
            source: ConnectionSource { rx: a_rx },
        };
        let b = Connection {
            remote: a_id,
            sink: ConnectionSink { tx: a_tx },
            source: ConnectionSource { rx: b_rx },
        };
        (a, b)
    }

    /// Connection whose reading side is fed by a relay
    pub fn from_parts(remote: PeerId, sink: ConnectionSink, rx: mpsc::Receiver<Bytes>) -> Self {
        Connection {
            remote,
            sink,
            source: ConnectionSource { rx },
        }
    }

    pub fn remote(&self) -> PeerId {
        self.remote
    }

    pub fn split(self) -> (ConnectionSink, ConnectionSource) {
        (self.sink, self.source)
    }
}
