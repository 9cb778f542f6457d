//! Application-level connection manager
//!
//! Keeps raw transport connections open to the Dias set of the application
//! ring. Those connections carry gossip; collaborations open their own
//! protocol streams on top through the global connection manager.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use dias_core::{DiasResult, PeerInfo};
use dias_ring::{DiasSet, Ring};

use crate::{
    ConnectionDriver, ConnectionManagerConfig, GlobalConnectionManager, PeerSet, ReconcileLoop,
    ReconcileReport, Reconciler,
};

struct AppDriver {
    gcm: GlobalConnectionManager,
    outbound: PeerSet,
}

#[async_trait]
impl ConnectionDriver for AppDriver {
    async fn connect(&self, peer: &PeerInfo) -> DiasResult<()> {
        self.gcm.transport().dial(peer).await?;
        self.outbound.insert(peer.clone());
        debug!(peer = %peer.id, "app connection up");
        Ok(())
    }

    async fn disconnect(&self, peer: &PeerInfo) {
        self.outbound.remove(&peer.id);
        self.gcm.maybe_hang_up(&peer.id).await;
    }

    fn outbound(&self) -> Vec<PeerInfo> {
        self.outbound.values()
    }
}

/// Reconciles the application ring's Dias set against raw connections
pub struct AppConnectionManager {
    reconciler: Arc<Reconciler>,
    driver: Arc<AppDriver>,
    config: ConnectionManagerConfig,
    running: Mutex<Option<ReconcileLoop>>,
}

impl AppConnectionManager {
    /// `outbound` is the set the global manager consults before hanging up
    pub fn new(
        ring: Ring,
        dias: DiasSet,
        gcm: GlobalConnectionManager,
        outbound: PeerSet,
        config: ConnectionManagerConfig,
    ) -> Self {
        let reconciler = Reconciler::new(ring, dias, config.max_unreachable_before_eviction);
        AppConnectionManager {
            reconciler: Arc::new(reconciler),
            driver: Arc::new(AppDriver { gcm, outbound }),
            config,
            running: Mutex::new(None),
        }
    }

    /// Same as `new`, reporting evicted peers on `evictions`
    pub fn with_evictions(
        ring: Ring,
        dias: DiasSet,
        gcm: GlobalConnectionManager,
        outbound: PeerSet,
        config: ConnectionManagerConfig,
        evictions: mpsc::UnboundedSender<PeerInfo>,
    ) -> Self {
        let reconciler =
            Reconciler::new(ring, dias, config.max_unreachable_before_eviction)
                .with_evictions(evictions);
        AppConnectionManager {
            reconciler: Arc::new(reconciler),
            driver: Arc::new(AppDriver { gcm, outbound }),
            config,
            running: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let driver: Arc<dyn ConnectionDriver> = self.driver.clone();
        let running = ReconcileLoop::spawn(Arc::clone(&self.reconciler), driver, &self.config);
        *self.running.lock() = Some(running);
    }

    /// Run one pass now
    pub async fn reset_connections(&self) -> ReconcileReport {
        self.reconciler.reconcile(self.driver.as_ref()).await
    }

    pub fn outbound(&self) -> &PeerSet {
        &self.driver.outbound
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub async fn stop(&self) {
        self.running.lock().take();
        for peer in self.driver.outbound.values() {
            self.driver.disconnect(&peer).await;
        }
    }
}
