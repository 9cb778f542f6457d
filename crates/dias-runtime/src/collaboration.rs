//! Collaboration facade
//!
//! Ties together the store, the replication protocol and the membership of
//! one collaboration around its root shared object.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use dias_core::{DiasError, DiasResult, PeerId, VectorClock};
use dias_crdt::{CrdtKind, CrdtValue, Mutation};
use dias_crypto::CollaborationKeys;
use dias_membership::{Membership, MembershipEvent};
use dias_protocol::Protocol;
use dias_store::{CollaborationStore, KvStore, SaveOutcome, Shared, StoreEvent};
use dias_transport::{GlobalConnectionManager, Gossip};
use dias_wire::RemoteMembership;

use crate::CollaborationConfig;

/// What a collaboration borrows from the node running it
#[derive(Clone)]
pub struct CollaborationContext {
    pub local: PeerId,
    pub gcm: GlobalConnectionManager,
    pub gossip: Gossip,
    pub kv: Arc<dyn KvStore>,
}

/// Per-collaboration options
#[derive(Clone, Debug, Default)]
pub struct CollaborationOptions {
    pub keys: Option<Arc<CollaborationKeys>>,
    pub config: CollaborationConfig,
}

impl CollaborationOptions {
    pub fn new(keys: Arc<CollaborationKeys>) -> Self {
        CollaborationOptions {
            keys: Some(keys),
            config: CollaborationConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CollaborationConfig) -> Self {
        self.config = config;
        self
    }
}

/// One replicated CRDT and everything keeping it in sync
pub struct Collaboration {
    name: String,
    kind: CrdtKind,
    keys: Arc<CollaborationKeys>,
    store: Arc<CollaborationStore>,
    protocol: Arc<Protocol>,
    membership: Membership,
    shared: SharedHandle,
}

impl Collaboration {
    pub fn new(
        ctx: CollaborationContext,
        name: &str,
        kind: CrdtKind,
        options: CollaborationOptions,
    ) -> DiasResult<Self> {
        if name.is_empty() {
            return Err(DiasError::Config("collaboration name must not be empty".into()));
        }
        options.config.validate()?;
        let keys = options
            .keys
            .ok_or_else(|| DiasError::Config(format!("collaboration {} needs keys", name)))?;

        let store = CollaborationStore::new(
            ctx.local,
            name,
            ctx.kv,
            Some(keys.cipher()),
            options.config.store_config(),
        );
        let shared = Arc::new(Shared::new(name, kind, ctx.local, Arc::clone(&keys)));
        store.set_shared(Arc::clone(&shared));
        let protocol = Protocol::new(
            ctx.local,
            name,
            Arc::clone(&store),
            options.config.protocol_config(),
        );
        let membership = Membership::new(
            name,
            kind.type_name(),
            ctx.gcm,
            ctx.gossip,
            Arc::clone(&protocol),
            Some(Arc::clone(&keys)),
            options.config.membership_config(),
        )?;

        Ok(Collaboration {
            name: name.to_string(),
            kind,
            keys,
            shared: SharedHandle {
                shared,
                store: Arc::clone(&store),
            },
            store,
            protocol,
            membership,
        })
    }

    /// Restore persisted state, then join the collaboration
    pub async fn start(&self) -> DiasResult<()> {
        self.store.start().await?;
        self.membership.start().await?;
        info!(collaboration = %self.name, kind = %self.kind, "collaboration started");
        Ok(())
    }

    pub async fn stop(&self) {
        self.membership.stop().await;
        self.store.stop();
        info!(collaboration = %self.name, "collaboration stopped");
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CrdtKind {
        self.kind
    }

    pub fn can_write(&self) -> bool {
        self.keys.can_write()
    }

    pub fn shared(&self) -> &SharedHandle {
        &self.shared
    }

    pub fn value(&self) -> CrdtValue {
        self.shared.value()
    }

    pub fn store(&self) -> &Arc<CollaborationStore> {
        &self.store
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.membership.peers()
    }

    pub fn deliver_remote_membership(&self, remote: RemoteMembership) -> DiasResult<()> {
        self.membership.deliver_remote_membership(remote)
    }

    /// Deltas, clock and state changes of the local store
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    pub fn subscribe_membership(&self) -> broadcast::Receiver<MembershipEvent> {
        self.membership.subscribe()
    }
}

impl std::fmt::Debug for Collaboration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaboration")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Local mutations of a collaboration's shared object
#[derive(Clone)]
pub struct SharedHandle {
    shared: Arc<Shared>,
    store: Arc<CollaborationStore>,
}

impl SharedHandle {
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn kind(&self) -> CrdtKind {
        self.shared.kind()
    }

    pub fn value(&self) -> CrdtValue {
        self.shared.value()
    }

    /// Set elements concatenated in order (gset)
    pub fn text(&self) -> String {
        self.value().as_text().map(str::to_string).unwrap_or_default()
    }

    pub fn counter(&self) -> u64 {
        self.value().as_counter().unwrap_or(0)
    }

    pub fn entries(&self) -> BTreeMap<String, Vec<Vec<u8>>> {
        match self.value() {
            CrdtValue::Map(map) => map,
            _ => BTreeMap::new(),
        }
    }

    pub async fn add(&self, element: impl Into<String>) -> DiasResult<VectorClock> {
        self.apply(Mutation::Add(element.into())).await
    }

    pub async fn increment(&self, by: u64) -> DiasResult<VectorClock> {
        self.apply(Mutation::Increment(by)).await
    }

    pub async fn write(&self, value: Vec<u8>) -> DiasResult<VectorClock> {
        self.apply(Mutation::Write(value)).await
    }

    pub async fn insert(&self, key: impl Into<String>, value: Vec<u8>) -> DiasResult<VectorClock> {
        self.apply(Mutation::Insert(key.into(), value)).await
    }

    pub async fn remove(&self, key: impl Into<String>) -> DiasResult<VectorClock> {
        self.apply(Mutation::Remove(key.into())).await
    }

    async fn apply(&self, mutation: Mutation) -> DiasResult<VectorClock> {
        let payload = self.shared.mutate(mutation)?;
        match self.store.save_delta(None, None, payload).await? {
            SaveOutcome::Applied(clock) => Ok(clock),
            SaveOutcome::NotApplied => Err(DiasError::InvalidState(format!(
                "local delta on {} was not applied",
                self.shared.name()
            ))),
        }
    }
}

impl std::fmt::Debug for SharedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedHandle").field("shared", &self.shared).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dias_core::PeerInfo;
    use dias_store::MemoryKv;
    use dias_transport::{MemoryNetwork, PeerSet};

    fn context(net: &MemoryNetwork, n: u8) -> CollaborationContext {
        let info = PeerInfo::new(PeerId::from_bytes([n; 32])).with_addr(format!("/memory/{}", n));
        let transport = net.add_node(info.clone());
        CollaborationContext {
            local: info.id,
            gcm: GlobalConnectionManager::new(transport.clone(), PeerSet::new()),
            gossip: Gossip::new(transport, "dias/app/test"),
            kv: Arc::new(MemoryKv::new()),
        }
    }

    #[tokio::test]
    async fn test_missing_keys_fail_fast() {
        let net = MemoryNetwork::new();
        let result = Collaboration::new(
            context(&net, 1),
            "doc",
            CrdtKind::GSet,
            CollaborationOptions::default(),
        );
        assert!(matches!(result, Err(DiasError::Config(_))));
    }

    #[tokio::test]
    async fn test_local_mutations_advance_clock() {
        let net = MemoryNetwork::new();
        let keys = Arc::new(CollaborationKeys::generate());
        let options = CollaborationOptions::new(keys);
        let collab =
            Collaboration::new(context(&net, 1), "counter", CrdtKind::GCounter, options).unwrap();
        collab.start().await.unwrap();

        collab.shared().increment(2).await.unwrap();
        let clock = collab.shared().increment(3).await.unwrap();
        assert_eq!(collab.shared().counter(), 5);
        assert_eq!(clock.get(&PeerId::from_bytes([1; 32])), 2);
        assert!(collab.can_write());
        collab.stop().await;
    }

    #[tokio::test]
    async fn test_read_only_collaboration_rejects_writes() {
        let net = MemoryNetwork::new();
        let keys = Arc::new(CollaborationKeys::generate().to_read_only());
        let options = CollaborationOptions::new(keys);
        let collab = Collaboration::new(context(&net, 1), "doc", CrdtKind::GSet, options).unwrap();
        collab.start().await.unwrap();
        assert!(!collab.can_write());
        assert!(collab.shared().add("x").await.is_err());
        assert_eq!(collab.shared().text(), "");
        collab.stop().await;
    }

    #[tokio::test]
    async fn test_map_entries() {
        let net = MemoryNetwork::new();
        let keys = Arc::new(CollaborationKeys::generate());
        let options = CollaborationOptions::new(keys);
        let collab =
            Collaboration::new(context(&net, 1), "settings", CrdtKind::OrMap, options).unwrap();
        collab.start().await.unwrap();
        collab.shared().insert("theme", b"dark".to_vec()).await.unwrap();
        collab.shared().insert("lang", b"en".to_vec()).await.unwrap();
        collab.shared().remove("lang").await.unwrap();

        let entries = collab.shared().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries["theme"], vec![b"dark".to_vec()]);
        collab.stop().await;
    }
}
