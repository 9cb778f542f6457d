//! Stores replicated without a network
//!
//! A `Replica` is one collaboration store with its shared object and
//! replication protocol. Replicas are wired to each other over in-process
//! connection pairs, so scenarios control exactly who pushes to whom.

use std::sync::Arc;

use parking_lot::Mutex;

use dias_core::{DiasResult, PeerId, PeerInfo, VectorClock};
use dias_crdt::{CrdtKind, CrdtValue, Mutation};
use dias_crypto::CollaborationKeys;
use dias_protocol::{Protocol, ProtocolConfig, Session};
use dias_store::{CollaborationStore, KvStore, MemoryKv, SaveOutcome, Shared, StoreConfig};
use dias_transport::Connection;

/// Collaboration name used by replicas
pub const COLLABORATION: &str = "doc";

/// Deterministic peer id for node `n`
pub fn peer_id(n: u8) -> PeerId {
    PeerId::from_bytes([n; 32])
}

/// Peer info for node `n` with its memory address
pub fn peer_info(n: u8) -> PeerInfo {
    PeerInfo::new(peer_id(n)).with_addr(format!("/memory/{}", n))
}

pub struct Replica {
    id: PeerId,
    kind: CrdtKind,
    keys: Arc<CollaborationKeys>,
    kv: Arc<dyn KvStore>,
    shared: Arc<Shared>,
    protocol: Arc<Protocol>,
    sessions: Mutex<Vec<Session>>,
}

impl Replica {
    /// A started replica over a fresh in-memory datastore
    pub async fn start(
        n: u8,
        kind: CrdtKind,
        keys: Arc<CollaborationKeys>,
        config: ProtocolConfig,
    ) -> DiasResult<Self> {
        Self::over(n, kind, keys, Arc::new(MemoryKv::new()), config).await
    }

    /// A started replica restoring whatever `kv` holds
    pub async fn over(
        n: u8,
        kind: CrdtKind,
        keys: Arc<CollaborationKeys>,
        kv: Arc<dyn KvStore>,
        config: ProtocolConfig,
    ) -> DiasResult<Self> {
        let id = peer_id(n);
        let store = CollaborationStore::new(
            id,
            COLLABORATION,
            Arc::clone(&kv),
            Some(keys.cipher()),
            StoreConfig::default(),
        );
        let shared = Arc::new(Shared::new(COLLABORATION, kind, id, Arc::clone(&keys)));
        store.set_shared(Arc::clone(&shared));
        store.start().await?;
        Ok(Replica {
            id,
            kind,
            keys,
            kv,
            shared,
            protocol: Protocol::new(id, COLLABORATION, store, config),
            sessions: Mutex::new(Vec::new()),
        })
    }

    /// Another node sharing this replica's datastore
    pub async fn sharing_store(&self, n: u8) -> DiasResult<Replica> {
        Replica::over(
            n,
            self.kind,
            Arc::clone(&self.keys),
            Arc::clone(&self.kv),
            self.protocol.config().clone(),
        )
        .await
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn store(&self) -> &Arc<CollaborationStore> {
        self.protocol.store()
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    pub fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub fn value(&self) -> CrdtValue {
        self.shared.value()
    }

    /// Concatenated set elements, empty for other kinds
    pub fn text(&self) -> String {
        self.value().as_text().map(str::to_string).unwrap_or_default()
    }

    pub async fn clock(&self) -> DiasResult<VectorClock> {
        self.store().latest_clock().await
    }

    /// Mutate the shared object and save the delta as a local event
    pub async fn mutate(&self, mutation: Mutation) -> DiasResult<SaveOutcome> {
        let payload = self.shared.mutate(mutation)?;
        self.store().save_delta(None, None, payload).await
    }

    pub async fn add(&self, element: &str) -> DiasResult<SaveOutcome> {
        self.mutate(Mutation::Add(element.to_string())).await
    }

    /// Open a stream on which `self` pushes and `other` pulls
    pub fn replicate_to(&self, other: &Replica) {
        let (dialer_end, handler_end) = Connection::pair(self.id, other.id);
        let push = self.protocol.dialer_for(other.id, dialer_end);
        let pull = other.protocol.accept(self.id, handler_end);
        self.sessions.lock().push(push);
        other.sessions.lock().push(pull);
    }

    /// End every session this replica runs
    pub fn disconnect(&self) {
        for session in self.sessions.lock().drain(..) {
            session.close();
        }
    }
}

impl Drop for Replica {
    fn drop(&mut self) {
        self.disconnect();
        self.store().stop();
    }
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Two replicas sharing keys, the first pushing to the second
pub async fn store_pair(kind: CrdtKind, config: ProtocolConfig) -> DiasResult<(Replica, Replica)> {
    let keys = Arc::new(CollaborationKeys::generate());
    let a = Replica::start(1, kind, Arc::clone(&keys), config.clone()).await?;
    let b = Replica::start(2, kind, keys, config).await?;
    a.replicate_to(&b);
    Ok((a, b))
}
