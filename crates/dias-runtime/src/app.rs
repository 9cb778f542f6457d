//! Node bootstrap
//!
//! An `App` owns the application transport and every collaboration the
//! node takes part in. Membership gossip arrives on the application topic
//! and is routed to the collaboration named in the message. With pinning
//! enabled, announcements of unknown collaborations make the node join
//! them, provided it has their keys.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use dias_core::{DiasError, DiasResult, PeerId, PeerInfo};
use dias_crdt::CrdtKind;
use dias_crypto::CollaborationKeys;
use dias_store::DatastoreRegistry;
use dias_transport::{AppTransport, PubSub, PubSubMessage, Transport};
use dias_wire::GossipMessage;

use crate::{AppConfig, Collaboration, CollaborationContext, CollaborationOptions};

const EVENT_CAPACITY: usize = 64;

/// Supplies keys for collaborations the node was not told about directly
pub trait KeyProvider: Send + Sync {
    fn keys_for(&self, collaboration: &str) -> Option<Arc<CollaborationKeys>>;
}

impl<F> KeyProvider for F
where
    F: Fn(&str) -> Option<Arc<CollaborationKeys>> + Send + Sync,
{
    fn keys_for(&self, collaboration: &str) -> Option<Arc<CollaborationKeys>> {
        self(collaboration)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppEvent {
    CollaborationAdded(String),
    CollaborationPinned(String),
    CollaborationRemoved(String),
}

/// A running node
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

struct AppInner {
    config: AppConfig,
    transport: AppTransport,
    datastores: DatastoreRegistry,
    keys: RwLock<Option<Arc<dyn KeyProvider>>>,
    collaborations: Mutex<HashMap<String, Arc<Collaboration>>>,
    /// Serializes collaboration creation
    creating: tokio::sync::Mutex<()>,
    events: broadcast::Sender<AppEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl App {
    /// `datastores` hands each collaboration its key-value store, by name
    pub async fn new(
        transport: Arc<dyn Transport>,
        pubsub: Arc<dyn PubSub>,
        datastores: DatastoreRegistry,
        config: AppConfig,
    ) -> DiasResult<Self> {
        config.validate()?;
        let transport = AppTransport::new(transport, pubsub, config.transport_config()).await?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(App {
            inner: Arc::new(AppInner {
                config,
                transport,
                datastores,
                keys: RwLock::new(None),
                collaborations: Mutex::new(HashMap::new()),
                creating: tokio::sync::Mutex::new(()),
                events,
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Keys used to pin announced collaborations
    pub fn set_key_provider(&self, provider: Arc<dyn KeyProvider>) {
        *self.inner.keys.write() = Some(provider);
    }

    pub async fn start(&self) -> DiasResult<()> {
        let gossip = self.inner.transport.gossip().start().await?;
        self.inner.transport.start();
        let router = tokio::spawn(gossip_router(Arc::downgrade(&self.inner), gossip));
        self.inner.tasks.lock().push(router);
        info!(
            app = %self.inner.config.name,
            peer = %self.local_peer().id,
            pinning = self.inner.config.pin_collaborations,
            "app started"
        );
        Ok(())
    }

    pub async fn stop(&self) {
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        let collaborations: Vec<Arc<Collaboration>> =
            self.inner.collaborations.lock().drain().map(|(_, c)| c).collect();
        for collaboration in collaborations {
            collaboration.stop().await;
        }
        self.inner.transport.stop().await;
        info!(app = %self.inner.config.name, "app stopped");
    }

    /// Join (or create) a collaboration. Asking again for a running one
    /// returns it.
    pub async fn collaborate(
        &self,
        name: &str,
        kind: CrdtKind,
        options: CollaborationOptions,
    ) -> DiasResult<Arc<Collaboration>> {
        let collaboration = self.inner.collaborate(name, kind, options).await?;
        Ok(collaboration)
    }

    pub fn collaboration(&self, name: &str) -> Option<Arc<Collaboration>> {
        self.inner.collaborations.lock().get(name).cloned()
    }

    pub fn collaboration_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.collaborations.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop and forget a collaboration. Its datastore stays registered.
    pub async fn leave(&self, name: &str) -> bool {
        let removed = self.inner.collaborations.lock().remove(name);
        match removed {
            Some(collaboration) => {
                collaboration.stop().await;
                self.inner.emit(AppEvent::CollaborationRemoved(name.to_string()));
                true
            }
            None => false,
        }
    }

    /// Route one gossip message as if it came from the application topic
    pub async fn handle_gossip(&self, message: PubSubMessage) {
        self.inner.route_gossip(message).await;
    }

    pub fn local_peer(&self) -> &PeerInfo {
        self.inner.transport.local_peer()
    }

    pub fn transport(&self) -> &AppTransport {
        &self.inner.transport
    }

    pub fn datastores(&self) -> &DatastoreRegistry {
        &self.inner.datastores
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.inner.events.subscribe()
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("name", &self.inner.config.name)
            .field("peer", &self.local_peer().id)
            .field("collaborations", &self.collaboration_names())
            .finish()
    }
}

impl AppInner {
    fn emit(&self, event: AppEvent) {
        let _ = self.events.send(event);
    }

    async fn collaborate(
        &self,
        name: &str,
        kind: CrdtKind,
        options: CollaborationOptions,
    ) -> DiasResult<Arc<Collaboration>> {
        let _creating = self.creating.lock().await;
        if let Some(existing) = self.collaborations.lock().get(name).cloned() {
            if existing.kind() != kind {
                return Err(DiasError::Config(format!(
                    "collaboration {} is a {}, not a {}",
                    name,
                    existing.kind(),
                    kind
                )));
            }
            return Ok(existing);
        }

        let ctx = CollaborationContext {
            local: self.transport.local_peer().id,
            gcm: self.transport.gcm().clone(),
            gossip: self.transport.gossip().clone(),
            kv: self.datastores.get_or_create(name),
        };
        let collaboration = Arc::new(Collaboration::new(ctx, name, kind, options)?);
        if let Err(e) = collaboration.start().await {
            collaboration.stop().await;
            return Err(e);
        }
        self.collaborations
            .lock()
            .insert(name.to_string(), Arc::clone(&collaboration));
        self.emit(AppEvent::CollaborationAdded(name.to_string()));
        Ok(collaboration)
    }

    async fn route_gossip(&self, message: PubSubMessage) {
        if message.from == self.transport.local_peer().id {
            return;
        }
        let gossip = match GossipMessage::decode(&message.data) {
            Ok(gossip) => gossip,
            Err(e) => {
                debug!(peer = %message.from, error = %e, "dropping undecodable gossip");
                return;
            }
        };

        let existing = self.collaborations.lock().get(&gossip.topic).cloned();
        match existing {
            Some(collaboration) => deliver(&collaboration, message.from, gossip),
            None => self.maybe_pin(message.from, gossip).await,
        }
    }

    async fn maybe_pin(&self, from: PeerId, gossip: GossipMessage) {
        if !self.config.pin_collaborations {
            return;
        }
        let Some(kind) = CrdtKind::from_type_name(&gossip.type_name) else {
            debug!(
                collaboration = %gossip.topic,
                type_name = %gossip.type_name,
                "cannot pin unknown type"
            );
            return;
        };
        let Some(provider) = self.keys.read().clone() else {
            return;
        };
        let Some(keys) = provider.keys_for(&gossip.topic) else {
            debug!(collaboration = %gossip.topic, "no keys to pin collaboration");
            return;
        };

        let options =
            CollaborationOptions::new(keys).with_config(self.config.collaboration.clone());
        match self.collaborate(&gossip.topic, kind, options).await {
            Ok(collaboration) => {
                info!(
                    collaboration = %gossip.topic,
                    kind = %kind,
                    peer = %from,
                    "pinned collaboration"
                );
                self.emit(AppEvent::CollaborationPinned(gossip.topic.clone()));
                deliver(&collaboration, from, gossip);
            }
            Err(e) => warn!(collaboration = %gossip.topic, error = %e, "pinning failed"),
        }
    }
}

fn deliver(collaboration: &Collaboration, from: PeerId, gossip: GossipMessage) {
    if collaboration.kind().type_name() != gossip.type_name {
        debug!(
            collaboration = %gossip.topic,
            peer = %from,
            type_name = %gossip.type_name,
            "ignoring membership of another type"
        );
        return;
    }
    if let Err(e) = collaboration.deliver_remote_membership(gossip.membership) {
        warn!(collaboration = %gossip.topic, peer = %from, error = %e, "bad remote membership");
    }
}

async fn gossip_router(app: Weak<AppInner>, mut messages: mpsc::UnboundedReceiver<PubSubMessage>) {
    while let Some(message) = messages.recv().await {
        let Some(app) = app.upgrade() else {
            break;
        };
        app.route_gossip(message).await;
    }
}

impl Drop for AppInner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
