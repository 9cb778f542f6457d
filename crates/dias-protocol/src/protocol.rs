//! Per-collaboration replication protocol
//!
//! One `Protocol` exists per collaboration. Outbound streams (we dialed)
//! run a push session, inbound streams run a pull session. Sessions are
//! isolated: a failing session ends its own stream and nothing else.

use std::sync::Arc;

use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use dias_core::{DiasResult, PeerId, PeerInfo};
use dias_store::CollaborationStore;
use dias_transport::{Connection, ConnectionSink, ProtocolHandler};
use dias_wire::ReplicationMessage;

use crate::{pull, push, Clocks};

const EVENT_CAPACITY: usize = 1024;

/// How the pusher sends a run of deltas
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeltaMode {
    /// One record per delta, as stored
    Stream,
    /// Deltas folded into one record per shared object
    #[default]
    Batch,
}

/// Replication settings
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProtocolConfig {
    pub delta_mode: DeltaMode,
}

impl ProtocolConfig {
    pub fn with_delta_mode(mut self, mode: DeltaMode) -> Self {
        self.delta_mode = mode;
        self
    }
}

/// Replication activity
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolEvent {
    InboundConnection(PeerId),
    InboundConnectionClosed(PeerId),
    OutboundConnection(PeerId),
    OutboundConnectionClosed(PeerId),
    InboundMessage { peer: PeerId, size: usize },
    OutboundMessage { peer: PeerId, size: usize },
    Error { peer: PeerId, error: String },
}

/// `/dias/collab/<collaboration>/1.0.0`
pub fn protocol_name(collaboration: &str) -> String {
    format!("/dias/collab/{}/1.0.0", collaboration)
}

/// A running replication session
///
/// `close` ends the stream from our side and lets the session wind down:
/// its clock tracking is released and its closed event is emitted.
/// Dropping the handle leaves the session running until the stream ends.
pub struct Session {
    peer: PeerId,
    task: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl Session {
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn close(&self) {
        self.shutdown.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the session has ended and cleaned up
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

/// Replication protocol of one collaboration
pub struct Protocol {
    self_id: PeerId,
    name: String,
    store: Arc<CollaborationStore>,
    clocks: Clocks,
    config: ProtocolConfig,
    events: broadcast::Sender<ProtocolEvent>,
}

impl Protocol {
    pub fn new(
        self_id: PeerId,
        collaboration: &str,
        store: Arc<CollaborationStore>,
        config: ProtocolConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Protocol {
            self_id,
            name: protocol_name(collaboration),
            store,
            clocks: Clocks::new(),
            config,
            events,
        })
    }

    /// Protocol name on the transport
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn self_id(&self) -> PeerId {
        self.self_id
    }

    pub fn store(&self) -> &Arc<CollaborationStore> {
        &self.store
    }

    pub fn clocks(&self) -> &Clocks {
        &self.clocks
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolEvent> {
        self.events.subscribe()
    }

    /// Run the pushing end on a stream we dialed
    pub fn dialer_for(self: &Arc<Self>, peer: PeerId, conn: Connection) -> Session {
        let proto = Arc::clone(self);
        let shutdown = Arc::new(Notify::new());
        let signal = Arc::clone(&shutdown);
        self.clocks.open_session(peer);
        let task = tokio::spawn(async move {
            proto.emit(ProtocolEvent::OutboundConnection(peer));
            let result = push::run(Arc::clone(&proto), peer, conn, signal).await;
            proto.finish(peer, result);
            proto.emit(ProtocolEvent::OutboundConnectionClosed(peer));
        });
        Session { peer, task, shutdown }
    }

    /// Run the pulling end on an inbound stream
    pub fn accept(self: &Arc<Self>, peer: PeerId, conn: Connection) -> Session {
        let proto = Arc::clone(self);
        let shutdown = Arc::new(Notify::new());
        let signal = Arc::clone(&shutdown);
        self.clocks.open_session(peer);
        let task = tokio::spawn(async move {
            proto.emit(ProtocolEvent::InboundConnection(peer));
            let result = pull::run(Arc::clone(&proto), peer, conn, signal).await;
            proto.finish(peer, result);
            proto.emit(ProtocolEvent::InboundConnectionClosed(peer));
        });
        Session { peer, task, shutdown }
    }

    /// Transport handler accepting every inbound stream
    pub fn handler(self: &Arc<Self>) -> ProtocolHandler {
        let proto = Arc::clone(self);
        Arc::new(move |peer: PeerInfo, conn: Connection| {
            proto.accept(peer.id, conn);
        })
    }

    pub(crate) fn emit(&self, event: ProtocolEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) async fn send(
        &self,
        sink: &ConnectionSink,
        peer: PeerId,
        message: &ReplicationMessage,
    ) -> DiasResult<()> {
        let bytes = message.encode()?;
        let size = bytes.len();
        sink.send(bytes).await?;
        self.emit(ProtocolEvent::OutboundMessage { peer, size });
        Ok(())
    }

    pub(crate) fn received(&self, peer: PeerId, bytes: &[u8]) -> DiasResult<ReplicationMessage> {
        self.emit(ProtocolEvent::InboundMessage { peer, size: bytes.len() });
        ReplicationMessage::decode(bytes)
    }

    fn finish(&self, peer: PeerId, result: DiasResult<()>) {
        self.clocks.close_session(&peer);
        match result {
            Ok(()) => debug!(peer = %peer, protocol = %self.name, "replication stream ended"),
            Err(e) if e.is_benign() => {
                debug!(peer = %peer, protocol = %self.name, "replication stream closed")
            }
            Err(e) => {
                warn!(peer = %peer, protocol = %self.name, error = %e, "replication stream failed");
                self.emit(ProtocolEvent::Error {
                    peer,
                    error: e.to_string(),
                });
            }
        }
    }
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol").field("name", &self.name).finish()
    }
}
