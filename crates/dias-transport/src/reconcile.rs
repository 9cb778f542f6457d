//! Dias-set reconciliation
//!
//! One pass compares the desired neighbour set (computed from the ring) with
//! the live outbound connections of a `ConnectionDriver`, connects what is
//! missing and disconnects what is no longer wanted. Failed connects are not
//! retried inside a pass; the next pass retries them. A peer failing
//! `max_unreachable_before_eviction` passes in a row is removed from the ring
//! and reported as evicted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use dias_core::{DiasResult, PeerId, PeerInfo};
use dias_ring::{DiasSet, Ring};
use dias_time::{Debouncer, PeriodicTask};

/// Timing and eviction settings shared by the connection managers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionManagerConfig {
    /// Quiet period after a ring change before reconciling
    pub debounce_reset_connections: Duration,
    /// Reconcile at least this often
    pub reset_connection_interval: Duration,
    /// Consecutive failed connects before a peer is evicted
    pub max_unreachable_before_eviction: u32,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            debounce_reset_connections: Duration::from_millis(1000),
            reset_connection_interval: Duration::from_millis(6000),
            max_unreachable_before_eviction: 10,
        }
    }
}

impl ConnectionManagerConfig {
    pub fn with_debounce(mut self, delay: Duration) -> Self {
        self.debounce_reset_connections = delay;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.reset_connection_interval = interval;
        self
    }

    pub fn with_max_unreachable(mut self, max: u32) -> Self {
        self.max_unreachable_before_eviction = max;
        self
    }
}

/// What a connection manager knows how to do with a single peer
#[async_trait]
pub trait ConnectionDriver: Send + Sync {
    async fn connect(&self, peer: &PeerInfo) -> DiasResult<()>;

    async fn disconnect(&self, peer: &PeerInfo);

    /// Peers currently connected outbound
    fn outbound(&self) -> Vec<PeerInfo>;
}

/// Outcome of one reconciliation pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub connected: Vec<PeerId>,
    pub failed: Vec<PeerId>,
    pub evicted: Vec<PeerId>,
    pub disconnected: Vec<PeerId>,
    /// Dias peers without any known address
    pub skipped: Vec<PeerId>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.connected.is_empty()
            && self.failed.is_empty()
            && self.evicted.is_empty()
            && self.disconnected.is_empty()
    }
}

/// Reconciliation state of one connection manager
pub struct Reconciler {
    ring: Ring,
    dias: DiasSet,
    max_unreachable: u32,
    unreachable: Mutex<HashMap<PeerId, u32>>,
    pass: tokio::sync::Mutex<()>,
    evictions: Option<mpsc::UnboundedSender<PeerInfo>>,
}

impl Reconciler {
    pub fn new(ring: Ring, dias: DiasSet, max_unreachable: u32) -> Self {
        Reconciler {
            ring,
            dias,
            max_unreachable,
            unreachable: Mutex::new(HashMap::new()),
            pass: tokio::sync::Mutex::new(()),
            evictions: None,
        }
    }

    /// Report evicted peers on `tx`
    pub fn with_evictions(mut self, tx: mpsc::UnboundedSender<PeerInfo>) -> Self {
        self.evictions = Some(tx);
        self
    }

    pub fn ring(&self) -> &Ring {
        &self.ring
    }

    pub fn dias(&self) -> &DiasSet {
        &self.dias
    }

    pub fn unreachable_count(&self, peer: &PeerId) -> u32 {
        self.unreachable.lock().get(peer).copied().unwrap_or(0)
    }

    /// Bring outbound connections in line with the current Dias set
    pub async fn reconcile(&self, driver: &dyn ConnectionDriver) -> ReconcileReport {
        let _pass = self.pass.lock().await;
        let mut report = ReconcileReport::default();

        let wanted = self.dias.compute(&self.ring.snapshot());
        let outbound = driver.outbound();

        for (id, peer) in &wanted {
            if outbound.iter().any(|p| p.id == *id) {
                continue;
            }
            if !peer.has_addrs() {
                report.skipped.push(*id);
                continue;
            }
            match driver.connect(peer).await {
                Ok(()) => {
                    self.unreachable.lock().remove(id);
                    report.connected.push(*id);
                }
                Err(e) => {
                    report.failed.push(*id);
                    if self.record_failure(id) {
                        warn!(peer = %id, error = %e, "evicting unreachable peer");
                        self.ring.remove(id);
                        if let Some(tx) = &self.evictions {
                            let _ = tx.send(peer.clone());
                        }
                        report.evicted.push(*id);
                    } else {
                        debug!(peer = %id, error = %e, "connect failed");
                    }
                }
            }
        }

        for peer in outbound {
            if wanted.contains_key(&peer.id) {
                continue;
            }
            driver.disconnect(&peer).await;
            self.unreachable.lock().remove(&peer.id);
            report.disconnected.push(peer.id);
        }
        // failures only count while the peer stays in the Dias set
        self.unreachable.lock().retain(|id, _| wanted.contains_key(id));

        if !report.is_noop() {
            debug!(
                connected = report.connected.len(),
                failed = report.failed.len(),
                evicted = report.evicted.len(),
                disconnected = report.disconnected.len(),
                "reconciled connections"
            );
        }
        report
    }

    /// Count a failed connect. Returns true once the eviction budget is spent.
    fn record_failure(&self, id: &PeerId) -> bool {
        let mut unreachable = self.unreachable.lock();
        let count = unreachable.entry(*id).or_insert(0);
        *count += 1;
        if self.max_unreachable <= *count {
            unreachable.remove(id);
            true
        } else {
            false
        }
    }
}

/// Background triggers of a reconciler: debounced ring changes, a periodic
/// timer and one pass right away. Everything stops when dropped.
pub struct ReconcileLoop {
    debouncer: Arc<Debouncer>,
    _periodic: PeriodicTask,
    ring_task: JoinHandle<()>,
}

impl ReconcileLoop {
    pub fn spawn(
        reconciler: Arc<Reconciler>,
        driver: Arc<dyn ConnectionDriver>,
        config: &ConnectionManagerConfig,
    ) -> Self {
        let pass = {
            let reconciler = Arc::clone(&reconciler);
            let driver = Arc::clone(&driver);
            move || {
                let reconciler = Arc::clone(&reconciler);
                let driver = Arc::clone(&driver);
                async move {
                    reconciler.reconcile(driver.as_ref()).await;
                }
            }
        };

        let debouncer = Arc::new(Debouncer::spawn(config.debounce_reset_connections, pass.clone()));
        let periodic = PeriodicTask::spawn(config.reset_connection_interval, pass.clone());

        let mut events = reconciler.ring().subscribe();
        let on_change = Arc::clone(&debouncer);
        let ring_task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => on_change.trigger(),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        tokio::spawn(pass());
        info!(
            debounce_ms = config.debounce_reset_connections.as_millis() as u64,
            interval_ms = config.reset_connection_interval.as_millis() as u64,
            "connection reconciliation started"
        );

        ReconcileLoop {
            debouncer,
            _periodic: periodic,
            ring_task,
        }
    }

    /// Schedule a debounced pass
    pub fn trigger(&self) {
        self.debouncer.trigger();
    }
}

impl Drop for ReconcileLoop {
    fn drop(&mut self) {
        self.ring_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dias_core::DiasError;
    use dias_ring::RingConfig;
    use std::collections::BTreeMap;

    fn info(n: u8) -> PeerInfo {
        PeerInfo::new(PeerId::from_bytes([n; 32])).with_addr(format!("/memory/{}", n))
    }

    #[derive(Default)]
    struct FakeDriver {
        outbound: Mutex<BTreeMap<PeerId, PeerInfo>>,
        failing: Mutex<Vec<PeerId>>,
        disconnects: Mutex<Vec<PeerId>>,
    }

    #[async_trait]
    impl ConnectionDriver for FakeDriver {
        async fn connect(&self, peer: &PeerInfo) -> DiasResult<()> {
            if self.failing.lock().contains(&peer.id) {
                return Err(DiasError::DialFailed {
                    peer: peer.id,
                    reason: "down".into(),
                });
            }
            self.outbound.lock().insert(peer.id, peer.clone());
            Ok(())
        }

        async fn disconnect(&self, peer: &PeerInfo) {
            self.outbound.lock().remove(&peer.id);
            self.disconnects.lock().push(peer.id);
        }

        fn outbound(&self) -> Vec<PeerInfo> {
            self.outbound.lock().values().cloned().collect()
        }
    }

    fn setup(max_unreachable: u32) -> (Ring, Reconciler) {
        let ring = Ring::new(2);
        let dias = DiasSet::new(info(1).id, &RingConfig::default());
        let reconciler = Reconciler::new(ring.clone(), dias, max_unreachable);
        (ring, reconciler)
    }

    #[tokio::test]
    async fn test_connects_dias_peers() {
        let (ring, reconciler) = setup(3);
        let driver = FakeDriver::default();
        ring.add(info(1));
        ring.add(info(2));
        ring.add(info(3));

        let report = reconciler.reconcile(&driver).await;
        assert_eq!(report.connected.len(), 2);
        assert_eq!(driver.outbound().len(), 2);

        let again = reconciler.reconcile(&driver).await;
        assert!(again.is_noop());
    }

    #[tokio::test]
    async fn test_skips_peers_without_addresses() {
        let (ring, reconciler) = setup(3);
        let driver = FakeDriver::default();
        ring.add(PeerInfo::new(PeerId::from_bytes([2; 32])));

        let report = reconciler.reconcile(&driver).await;
        assert_eq!(report.skipped, vec![PeerId::from_bytes([2; 32])]);
        assert!(report.connected.is_empty());
        assert_eq!(reconciler.unreachable_count(&PeerId::from_bytes([2; 32])), 0);
    }

    #[tokio::test]
    async fn test_disconnects_peers_outside_dias_set() {
        let (ring, reconciler) = setup(3);
        let driver = FakeDriver::default();
        ring.add(info(2));
        reconciler.reconcile(&driver).await;
        assert_eq!(driver.outbound().len(), 1);

        ring.remove(&info(2).id);
        let report = reconciler.reconcile(&driver).await;
        assert_eq!(report.disconnected, vec![info(2).id]);
        assert!(driver.outbound().is_empty());
    }

    #[tokio::test]
    async fn test_evicts_after_budget() {
        let (ring, reconciler) = setup(3);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reconciler = reconciler.with_evictions(tx);
        let driver = FakeDriver::default();
        driver.failing.lock().push(info(2).id);
        ring.add(info(2));

        for round in 1..3 {
            let report = reconciler.reconcile(&driver).await;
            assert_eq!(report.failed, vec![info(2).id]);
            assert!(report.evicted.is_empty());
            assert_eq!(reconciler.unreachable_count(&info(2).id), round);
        }

        let report = reconciler.reconcile(&driver).await;
        assert_eq!(report.evicted, vec![info(2).id]);
        assert!(!ring.has(&info(2).id));
        assert_eq!(rx.recv().await.unwrap().id, info(2).id);
        assert_eq!(reconciler.unreachable_count(&info(2).id), 0);
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let (ring, reconciler) = setup(3);
        let driver = FakeDriver::default();
        driver.failing.lock().push(info(2).id);
        ring.add(info(2));
        reconciler.reconcile(&driver).await;
        assert_eq!(reconciler.unreachable_count(&info(2).id), 1);

        driver.failing.lock().clear();
        reconciler.reconcile(&driver).await;
        assert_eq!(reconciler.unreachable_count(&info(2).id), 0);
        assert!(ring.has(&info(2).id));
    }

    #[tokio::test]
    async fn test_counter_dropped_when_peer_leaves_dias_set() {
        let (ring, reconciler) = setup(3);
        let driver = FakeDriver::default();
        driver.failing.lock().push(info(2).id);
        ring.add(info(2));
        reconciler.reconcile(&driver).await;
        assert_eq!(reconciler.unreachable_count(&info(2).id), 1);

        ring.remove(&info(2).id);
        let report = reconciler.reconcile(&driver).await;
        assert!(report.disconnected.is_empty());
        assert_eq!(reconciler.unreachable_count(&info(2).id), 0);

        // coming back starts a fresh budget
        ring.add(info(2));
        reconciler.reconcile(&driver).await;
        assert_eq!(reconciler.unreachable_count(&info(2).id), 1);
    }

    #[tokio::test]
    async fn test_loop_reacts_to_ring_changes() {
        let (ring, reconciler) = setup(3);
        let driver = Arc::new(FakeDriver::default());
        let config = ConnectionManagerConfig::default()
            .with_debounce(Duration::from_millis(10))
            .with_interval(Duration::from_secs(60));
        let _loop = ReconcileLoop::spawn(Arc::new(reconciler), driver.clone(), &config);

        ring.add(info(2));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(driver.outbound().len(), 1);
    }
}
