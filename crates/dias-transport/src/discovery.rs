//! Topic-aware peer discovery
//!
//! Peers announced by the transport are tested one at a time: dial, then
//! wait for them to show up as subscribers of the application topic.
//! Interested peers join the ring, the others are hung up on. A peer that
//! fails the test is never tried again.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::IteratorRandom;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use dias_core::{DiasResult, PeerId, PeerInfo};
use dias_ring::Ring;
use dias_time::jitter;

use crate::{PubSub, Transport};

/// Discovery timing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Upper bound of the random delay before testing a peer
    pub max_throttle_delay: Duration,
    /// Topic membership poll period
    pub poll_interval: Duration,
    /// Give up on topic membership after this long
    pub poll_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_throttle_delay: Duration::from_millis(5000),
            poll_interval: Duration::from_millis(2000),
            poll_timeout: Duration::from_millis(5000),
        }
    }
}

impl DiscoveryConfig {
    pub fn with_max_throttle_delay(mut self, delay: Duration) -> Self {
        self.max_throttle_delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }
}

/// Result of testing a single peer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Interested,
    NotInterested,
    /// Joined the ring by other means while waiting
    AlreadyKnown,
}

#[derive(Default)]
struct DiscoveryState {
    pending: BTreeMap<PeerId, PeerInfo>,
    testing: HashSet<PeerId>,
    failed: HashSet<PeerId>,
}

struct DiscoveryInner {
    ring: Ring,
    transport: Arc<dyn Transport>,
    pubsub: Arc<dyn PubSub>,
    app_topic: String,
    config: DiscoveryConfig,
    state: Mutex<DiscoveryState>,
    wake: Notify,
}

/// Admission of discovered peers into the application ring
#[derive(Clone)]
pub struct Discovery {
    inner: Arc<DiscoveryInner>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Discovery {
    pub fn new(
        ring: Ring,
        transport: Arc<dyn Transport>,
        pubsub: Arc<dyn PubSub>,
        app_topic: impl Into<String>,
        config: DiscoveryConfig,
    ) -> Self {
        Discovery {
            inner: Arc::new(DiscoveryInner {
                ring,
                transport,
                pubsub,
                app_topic: app_topic.into(),
                config,
                state: Mutex::new(DiscoveryState::default()),
                wake: Notify::new(),
            }),
            worker: Arc::new(Mutex::new(None)),
        }
    }

    pub fn start(&self) {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            loop {
                let next = inner.take_random_pending();
                match next {
                    Some(peer) => inner.test(peer).await,
                    None => inner.wake.notified().await,
                }
            }
        });
        if let Some(previous) = self.worker.lock().replace(task) {
            previous.abort();
        }
        debug!(topic = %self.inner.app_topic, "discovery started");
    }

    /// Drop queued peers and stop testing
    pub fn stop(&self) {
        if let Some(task) = self.worker.lock().take() {
            task.abort();
        }
        let mut state = self.inner.state.lock();
        state.pending.clear();
        state.testing.clear();
    }

    /// Queue a peer for testing. Returns false if it was ignored.
    pub fn peer_discovered(&self, peer: PeerInfo) -> bool {
        if self.inner.ring.has(&peer.id) {
            return false;
        }
        {
            let mut state = self.inner.state.lock();
            if state.pending.contains_key(&peer.id)
                || state.testing.contains(&peer.id)
                || state.failed.contains(&peer.id)
            {
                return false;
            }
            state.pending.insert(peer.id, peer);
        }
        self.inner.wake.notify_one();
        true
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn is_failed(&self, peer: &PeerId) -> bool {
        self.inner.state.lock().failed.contains(peer)
    }

    /// Test a peer right away, bypassing the queue and throttle
    pub async fn test_peer(&self, peer: &PeerInfo) -> DiasResult<Verdict> {
        self.inner.interest_of(peer).await
    }
}

impl DiscoveryInner {
    fn take_random_pending(&self) -> Option<PeerInfo> {
        let mut state = self.state.lock();
        let id = *state.pending.keys().choose(&mut rand::thread_rng())?;
        let peer = state.pending.remove(&id)?;
        state.testing.insert(id);
        Some(peer)
    }

    async fn test(&self, peer: PeerInfo) {
        tokio::time::sleep(jitter(self.config.max_throttle_delay)).await;
        match self.interest_of(&peer).await {
            Ok(Verdict::Interested) => {
                info!(peer = %peer.id, "discovered interested peer");
                self.ring.add(peer.clone());
            }
            Ok(Verdict::NotInterested) => {
                debug!(peer = %peer.id, topic = %self.app_topic, "peer not interested");
                if let Err(e) = self.transport.hang_up(&peer.id).await {
                    debug!(peer = %peer.id, error = %e, "hang up after discovery failed");
                }
            }
            Ok(Verdict::AlreadyKnown) => {}
            Err(e) => {
                if !e.is_benign() {
                    warn!(peer = %peer.id, error = %e, "discovery failed");
                }
                self.state.lock().failed.insert(peer.id);
            }
        }
        self.state.lock().testing.remove(&peer.id);
    }

    async fn interest_of(&self, peer: &PeerInfo) -> DiasResult<Verdict> {
        if self.ring.has(&peer.id) {
            return Ok(Verdict::AlreadyKnown);
        }
        self.transport.dial(peer).await?;

        let deadline = tokio::time::Instant::now() + self.config.poll_timeout;
        loop {
            if self.pubsub.peers(&self.app_topic).await?.contains(&peer.id) {
                return Ok(Verdict::Interested);
            }
            if tokio::time::Instant::now() + self.config.poll_interval > deadline {
                return Ok(Verdict::NotInterested);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
