//! Whole nodes on an in-memory network

use std::sync::Arc;

use tracing::info;

use dias_core::{DiasError, DiasResult, PeerId};
use dias_crdt::CrdtKind;
use dias_crypto::CollaborationKeys;
use dias_runtime::{App, AppConfig, Collaboration, CollaborationConfig, CollaborationOptions};
use dias_store::DatastoreRegistry;
use dias_transport::MemoryNetwork;

use crate::peer_info;

/// Collaboration timings short enough for tests
pub fn fast_collaboration_config() -> CollaborationConfig {
    CollaborationConfig::default()
        .with_connection_timing(20, 200)
        .with_gossip_interval(20, 200)
        .with_max_unreachable(2)
}

/// Node timings short enough for tests
pub fn fast_app_config(name: &str) -> AppConfig {
    AppConfig::new(name)
        .with_connection_timing(20, 200)
        .with_discovery_timing(10, 20, 500)
        .with_collaboration(fast_collaboration_config())
}

/// Nodes `1..=size` sharing one network and one set of collaboration keys
pub struct Swarm {
    network: MemoryNetwork,
    config: AppConfig,
    keys: Arc<CollaborationKeys>,
    nodes: Vec<App>,
}

impl Swarm {
    pub async fn start(size: u8, config: AppConfig) -> DiasResult<Self> {
        let mut swarm = Swarm {
            network: MemoryNetwork::new(),
            config,
            keys: Arc::new(CollaborationKeys::generate()),
            nodes: Vec::with_capacity(size as usize),
        };
        for _ in 0..size {
            swarm.add_node().await?;
        }
        info!(size, app = %swarm.config.name, "swarm started");
        Ok(swarm)
    }

    /// Start one more node, numbered after the existing ones
    pub async fn add_node(&mut self) -> DiasResult<App> {
        let n = u8::try_from(self.nodes.len() + 1)
            .map_err(|_| DiasError::Config("a swarm holds at most 255 nodes".into()))?;
        let transport = self.network.add_node(peer_info(n));
        let app = App::new(
            transport.clone(),
            transport,
            DatastoreRegistry::new(),
            self.config.clone(),
        )
        .await?;
        app.start().await?;
        self.nodes.push(app.clone());
        Ok(app)
    }

    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    pub fn keys(&self) -> &Arc<CollaborationKeys> {
        &self.keys
    }

    pub fn nodes(&self) -> &[App] {
        &self.nodes
    }

    /// Node `i`, counted from zero
    pub fn node(&self, i: usize) -> &App {
        &self.nodes[i]
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.nodes.iter().map(|app| app.local_peer().id).collect()
    }

    /// Let every node discover every other node
    pub fn announce_all(&self) {
        for a in &self.nodes {
            for b in &self.nodes {
                if a.local_peer().id != b.local_peer().id {
                    self.network.announce(&a.local_peer().id, b.local_peer().clone());
                }
            }
        }
    }

    /// Every node joins `name` with the swarm keys
    pub async fn collaborate(
        &self,
        name: &str,
        kind: CrdtKind,
    ) -> DiasResult<Vec<Arc<Collaboration>>> {
        let mut collaborations = Vec::with_capacity(self.nodes.len());
        for app in &self.nodes {
            let options = CollaborationOptions::new(Arc::clone(&self.keys))
                .with_config(self.config.collaboration.clone());
            collaborations.push(app.collaborate(name, kind, options).await?);
        }
        Ok(collaborations)
    }

    /// Stop node `i` and take it off the network
    pub async fn kill(&self, i: usize) {
        let app = &self.nodes[i];
        app.stop().await;
        self.network.remove_node(&app.local_peer().id);
    }

    pub async fn stop(&self) {
        for app in &self.nodes {
            app.stop().await;
        }
    }
}

impl std::fmt::Debug for Swarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swarm")
            .field("app", &self.config.name)
            .field("nodes", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{eventually, DEFAULT_TIMEOUT};

    #[test]
    fn test_fast_configs_are_valid() {
        assert!(fast_app_config("swarm").validate().is_ok());
    }

    #[tokio::test]
    async fn test_members_find_each_other() {
        let swarm = Swarm::start(3, fast_app_config("swarm")).await.unwrap();
        let collaborations = swarm.collaborate("doc", CrdtKind::GSet).await.unwrap();
        let everyone = eventually(DEFAULT_TIMEOUT, || {
            collaborations.iter().all(|c| c.membership().peer_count() == 3)
        })
        .await;
        assert!(everyone);
        swarm.stop().await;
    }
}
