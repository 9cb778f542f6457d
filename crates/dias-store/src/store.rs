//! Collaboration store
//!
//! Persists, for one collaboration:
//! - `/clock`: the current vector clock
//! - `/seq`: the sequence number of the latest delta
//! - `/d:<seq as 20 hex digits>`: the delta log
//! - `/state/<name>` and `/stateNames`: merged state per shared object
//!
//! Writes go through a single async mutex, so deltas are applied one at a
//! time and a delta is only accepted on top of the exact clock it was
//! produced against. Values pass through CBOR and, when configured, the
//! collaboration cipher before reaching the datastore.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_bytes::ByteBuf;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use dias_core::{DeltaRecord, DiasError, DiasResult, PeerId, VectorClock};
use dias_crdt::CrdtState;
use dias_crypto::Cipher;
use dias_time::Debouncer;
use dias_wire::{SharedPayload, StateMap};

use crate::{KvStore, Shared, StoreConfig};

const EVENT_CAPACITY: usize = 1024;

const KEY_SEQ: &str = "/seq";
const KEY_CLOCK: &str = "/clock";
const KEY_STATE_NAMES: &str = "/stateNames";
const DELTA_PREFIX: &str = "/d:";

fn delta_key(seq: u64) -> String {
    format!("{}{:020x}", DELTA_PREFIX, seq)
}

fn state_key(name: &str) -> String {
    format!("/state/{}", name)
}

fn delta_seq(key: &str) -> Option<u64> {
    u64::from_str_radix(key.strip_prefix(DELTA_PREFIX)?, 16).ok()
}

/// Result of `save_delta`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Applied; carries the new clock
    Applied(VectorClock),
    /// The delta was not produced against the current clock
    NotApplied,
}

impl SaveOutcome {
    pub fn clock(&self) -> Option<&VectorClock> {
        match self {
            SaveOutcome::Applied(clock) => Some(clock),
            SaveOutcome::NotApplied => None,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, SaveOutcome::Applied(_))
    }
}

/// Store notifications
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreEvent {
    Delta { payload: Vec<u8>, clock: VectorClock },
    ClockChanged(VectorClock),
    StateChanged { name: String, clock: VectorClock },
}

/// Delta log, clock and states of one collaboration
pub struct CollaborationStore {
    self_id: PeerId,
    name: String,
    kv: Arc<dyn KvStore>,
    cipher: Option<Arc<dyn Cipher>>,
    config: StoreConfig,
    queue: tokio::sync::Mutex<()>,
    seq: AtomicU64,
    shareds: RwLock<Vec<Arc<Shared>>>,
    events: broadcast::Sender<StoreEvent>,
    trim: Mutex<Option<Debouncer>>,
    trimming: AtomicBool,
    this: Weak<CollaborationStore>,
}

impl CollaborationStore {
    pub fn new(
        self_id: PeerId,
        name: impl Into<String>,
        kv: Arc<dyn KvStore>,
        cipher: Option<Arc<dyn Cipher>>,
        config: StoreConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let name = name.into();
        Arc::new_cyclic(|this| CollaborationStore {
            self_id,
            name,
            kv,
            cipher,
            config,
            queue: tokio::sync::Mutex::new(()),
            seq: AtomicU64::new(0),
            shareds: RwLock::new(Vec::new()),
            events,
            trim: Mutex::new(None),
            trimming: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    /// Load the sequence and the persisted state of registered objects
    pub async fn start(&self) -> DiasResult<()> {
        let _queue = self.queue.lock().await;
        let seq: u64 = self.get(KEY_SEQ).await?.unwrap_or(0);
        self.seq.store(seq, Ordering::SeqCst);

        let shareds = self.shareds.read().clone();
        for shared in shareds {
            if let Some(state) = self.get::<ByteBuf>(&state_key(shared.name())).await? {
                shared.apply_state(&state)?;
            }
        }

        let this = self.this.clone();
        let trim = Debouncer::spawn(self.config.delta_trim_timeout, move || {
            let this = this.clone();
            async move {
                if let Some(store) = this.upgrade() {
                    if let Err(e) = store.trim_deltas().await {
                        warn!(collaboration = %store.name, error = %e, "delta trim failed");
                    }
                }
            }
        });
        *self.trim.lock() = Some(trim);
        info!(collaboration = %self.name, seq, "store started");
        Ok(())
    }

    pub fn stop(&self) {
        self.trim.lock().take();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn self_id(&self) -> PeerId {
        self.self_id
    }

    pub fn set_shared(&self, shared: Arc<Shared>) {
        self.shareds.write().push(shared);
    }

    pub fn find_shared(&self, name: &str) -> Option<Arc<Shared>> {
        self.shareds.read().iter().find(|s| s.name() == name).cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Sequence number of the latest delta
    pub fn sequence(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    pub async fn latest_clock(&self) -> DiasResult<VectorClock> {
        Ok(self.get(KEY_CLOCK).await?.unwrap_or_default())
    }

    /// Apply a delta on top of `previous` (default: the current clock),
    /// authored by `author` (default: one local event).
    pub async fn save_delta(
        &self,
        previous: Option<VectorClock>,
        author: Option<VectorClock>,
        payload: Vec<u8>,
    ) -> DiasResult<SaveOutcome> {
        let _queue = self.queue.lock().await;

        let current = self.latest_clock().await?;
        let previous = previous.unwrap_or_else(|| current.clone());
        let author = author.unwrap_or_else(|| VectorClock::single(self.self_id, 1));

        if !previous.is_identical(&current) {
            debug!(
                collaboration = %self.name,
                previous = ?previous,
                current = ?current,
                "delta not applied: clock mismatch"
            );
            return Ok(SaveOutcome::NotApplied);
        }

        let next = current.merge(&previous.increment_all(&author));
        let decoded = SharedPayload::decode(&payload)?;
        let new_state = match self.find_shared(decoded.name()) {
            Some(shared) => shared.apply(&decoded)?,
            None => {
                debug!(
                    collaboration = %self.name,
                    shared = %decoded.name(),
                    "delta for unknown shared object"
                );
                None
            }
        };

        let seq = self.seq.load(Ordering::SeqCst) + 1;
        let record = DeltaRecord::new(previous, author, payload.clone());
        self.put(&delta_key(seq), &record).await?;
        self.put(KEY_CLOCK, &next).await?;
        self.put(KEY_SEQ, &seq).await?;
        self.seq.store(seq, Ordering::SeqCst);

        if let Some(state) = &new_state {
            self.save_state_name(decoded.name()).await?;
            self.put(&state_key(decoded.name()), &ByteBuf::from(state.clone())).await?;
        }

        debug!(collaboration = %self.name, seq, clock = ?next, "saved delta");
        self.schedule_trim();

        let _ = self.events.send(StoreEvent::Delta {
            payload,
            clock: next.clone(),
        });
        let _ = self.events.send(StoreEvent::ClockChanged(next.clone()));
        if new_state.is_some() {
            let _ = self.events.send(StoreEvent::StateChanged {
                name: decoded.name().to_string(),
                clock: next.clone(),
            });
        }
        Ok(SaveOutcome::Applied(next))
    }

    /// Merge full states. Returns `None` if `clock` was already seen.
    /// Without a clock the merge counts as one local event.
    pub async fn save_states(
        &self,
        clock: Option<VectorClock>,
        states: &StateMap,
    ) -> DiasResult<Option<VectorClock>> {
        let _queue = self.queue.lock().await;

        let latest = self.latest_clock().await?;
        let clock = match clock {
            None => {
                let mut clock = latest;
                clock.increment(self.self_id);
                clock
            }
            Some(remote) => {
                if latest.dominates(&remote) {
                    return Ok(None);
                }
                latest.merge(&remote)
            }
        };

        let mut changed = Vec::new();
        for (name, encoded) in states {
            let Some(shared) = self.find_shared(name) else {
                debug!(
                    collaboration = %self.name,
                    shared = %name,
                    "state for unknown shared object"
                );
                continue;
            };
            let merged = shared.apply_state(encoded)?;
            self.save_state_name(name).await?;
            self.put(&state_key(name), &ByteBuf::from(merged)).await?;
            changed.push(name.clone());
        }
        self.put(KEY_CLOCK, &clock).await?;

        debug!(collaboration = %self.name, clock = ?clock, states = changed.len(), "saved states");
        let _ = self.events.send(StoreEvent::ClockChanged(clock.clone()));
        for name in changed {
            let _ = self.events.send(StoreEvent::StateChanged {
                name,
                clock: clock.clone(),
            });
        }
        Ok(Some(clock))
    }

    /// True if the current clock has seen everything `clock` has
    pub async fn contains(&self, clock: &VectorClock) -> DiasResult<bool> {
        let _queue = self.queue.lock().await;
        Ok(self.latest_clock().await?.dominates(clock))
    }

    /// Persisted encoded state of one shared object
    pub async fn state(&self, name: &str) -> DiasResult<Option<Vec<u8>>> {
        Ok(self.get::<ByteBuf>(&state_key(name)).await?.map(ByteBuf::into_vec))
    }

    pub async fn states(&self) -> DiasResult<StateMap> {
        let names: BTreeSet<String> = self.get(KEY_STATE_NAMES).await?.unwrap_or_default();
        let mut states = BTreeMap::new();
        for name in names {
            if let Some(state) = self.state(&name).await? {
                states.insert(name, state);
            }
        }
        Ok(states)
    }

    /// Clock and states read under the write queue, so they match
    pub async fn clock_and_states(&self) -> DiasResult<(VectorClock, StateMap)> {
        let _queue = self.queue.lock().await;
        Ok((self.latest_clock().await?, self.states().await?))
    }

    /// Deltas that causally follow `since`, in log order
    pub async fn delta_stream(&self, since: &VectorClock) -> DiasResult<DeltaStream> {
        let entries = self.kv.query(DELTA_PREFIX).await?;
        Ok(DeltaStream {
            entries: entries.into_iter(),
            cipher: self.cipher.clone(),
            watermark: since.clone(),
        })
    }

    /// The delta stream since `since` folded into one record per shared
    /// object. Records are chained: each one's previous clock is the clock
    /// reached after the records before it.
    pub async fn delta_batch(&self, since: &VectorClock) -> DiasResult<Vec<DeltaRecord>> {
        let mut order: Vec<String> = Vec::new();
        let mut folded: BTreeMap<String, (VectorClock, CrdtState)> = BTreeMap::new();

        for record in self.delta_stream(since).await? {
            let payload = SharedPayload::decode(&record.payload)?;
            let shared = self
                .find_shared(payload.name())
                .ok_or_else(|| DiasError::UnknownShared(payload.name().to_string()))?;
            let delta = shared.open(&payload)?;
            match folded.get_mut(payload.name()) {
                Some((author, state)) => {
                    *author = author.increment_all(&record.author_clock);
                    state.join(&delta)?;
                }
                None => {
                    order.push(payload.name().to_string());
                    folded.insert(payload.name().to_string(), (record.author_clock.clone(), delta));
                }
            }
        }

        let mut watermark = since.clone();
        let mut batch = Vec::with_capacity(order.len());
        for name in order {
            let Some((author, state)) = folded.remove(&name) else {
                continue;
            };
            let shared = self
                .find_shared(&name)
                .ok_or_else(|| DiasError::UnknownShared(name.clone()))?;
            let payload = shared.seal(&state)?.encode()?;
            let record = DeltaRecord::new(watermark.clone(), author, payload);
            watermark = record.next_clock();
            batch.push(record);
        }
        Ok(batch)
    }

    /// Delete deltas older than the retention window
    pub async fn trim_deltas(&self) -> DiasResult<usize> {
        if self.trimming.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }
        let result = self.trim_deltas_inner().await;
        self.trimming.store(false, Ordering::SeqCst);
        result
    }

    async fn trim_deltas_inner(&self) -> DiasResult<usize> {
        let seq = self.sequence();
        let first = seq.saturating_sub(self.config.max_delta_retention);
        let mut trimmed = 0;
        for key in self.kv.query_keys(DELTA_PREFIX).await? {
            match delta_seq(&key) {
                Some(n) if n < first => {
                    self.kv.delete(&key).await?;
                    trimmed += 1;
                }
                Some(_) => {}
                None => warn!(collaboration = %self.name, key = %key, "malformed delta key"),
            }
        }
        if trimmed > 0 {
            debug!(collaboration = %self.name, trimmed, first, "trimmed deltas");
        }
        Ok(trimmed)
    }

    fn schedule_trim(&self) {
        if let Some(trim) = self.trim.lock().as_ref() {
            trim.trigger();
        }
    }

    async fn save_state_name(&self, name: &str) -> DiasResult<()> {
        let mut names: BTreeSet<String> = self.get(KEY_STATE_NAMES).await?.unwrap_or_default();
        if names.insert(name.to_string()) {
            self.put(KEY_STATE_NAMES, &names).await?;
        }
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> DiasResult<Option<T>> {
        match self.kv.get(key).await? {
            Some(bytes) => Ok(Some(decode_value(self.cipher.as_deref(), &bytes)?)),
            None => Ok(None),
        }
    }

    async fn put<T: Serialize>(&self, key: &str, value: &T) -> DiasResult<()> {
        let bytes = encode_value(self.cipher.as_deref(), value)?;
        self.kv.put(key, bytes).await
    }
}

impl std::fmt::Debug for CollaborationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaborationStore")
            .field("name", &self.name)
            .field("seq", &self.sequence())
            .finish()
    }
}

fn encode_value<T: Serialize>(cipher: Option<&dyn Cipher>, value: &T) -> DiasResult<Vec<u8>> {
    let encoded = dias_wire::encode(value)?;
    match cipher {
        Some(cipher) => cipher.encrypt(&encoded),
        None => Ok(encoded),
    }
}

fn decode_value<T: DeserializeOwned>(cipher: Option<&dyn Cipher>, bytes: &[u8]) -> DiasResult<T> {
    match cipher {
        Some(cipher) => dias_wire::decode(&cipher.decrypt(bytes)?),
        None => dias_wire::decode(bytes),
    }
}

/// Lazy causal walk over the delta log.
///
/// Yields a record only if its previous clock is exactly the watermark; the
/// watermark then advances to the clock after that record. Undecodable
/// entries are logged and skipped.
pub struct DeltaStream {
    entries: std::vec::IntoIter<(String, Vec<u8>)>,
    cipher: Option<Arc<dyn Cipher>>,
    watermark: VectorClock,
}

impl DeltaStream {
    /// Clock reached after the records yielded so far
    pub fn watermark(&self) -> &VectorClock {
        &self.watermark
    }
}

impl Iterator for DeltaStream {
    type Item = DeltaRecord;

    fn next(&mut self) -> Option<DeltaRecord> {
        for (key, bytes) in self.entries.by_ref() {
            let record: DeltaRecord = match decode_value(self.cipher.as_deref(), &bytes) {
                Ok(record) => record,
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping undecodable delta");
                    continue;
                }
            };
            if record.previous_clock.is_identical(&self.watermark) {
                self.watermark = record.next_clock();
                return Some(record);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryKv;
    use dias_crdt::{CrdtKind, CrdtValue, Mutation};
    use dias_crypto::{ChaChaCipher, CollaborationKeys};
    use std::time::Duration;

    fn peer(n: u8) -> PeerId {
        PeerId::from_bytes([n; 32])
    }

    struct Fixture {
        store: Arc<CollaborationStore>,
        shared: Arc<Shared>,
        kv: Arc<MemoryKv>,
    }

    async fn fixture(
        id: u8,
        keys: &Arc<CollaborationKeys>,
        kind: CrdtKind,
        config: StoreConfig,
    ) -> Fixture {
        let kv = Arc::new(MemoryKv::new());
        let store =
            CollaborationStore::new(peer(id), "collab", kv.clone(), Some(keys.cipher()), config);
        let shared = Arc::new(Shared::new("collab", kind, peer(id), Arc::clone(keys)));
        store.set_shared(Arc::clone(&shared));
        store.start().await.unwrap();
        Fixture { store, shared, kv }
    }

    async fn add(f: &Fixture, element: &str) -> SaveOutcome {
        let payload = f.shared.mutate(Mutation::Add(element.into())).unwrap();
        f.store.save_delta(None, None, payload).await.unwrap()
    }

    #[tokio::test]
    async fn test_local_deltas_advance_clock() {
        let keys = Arc::new(CollaborationKeys::generate());
        let f = fixture(1, &keys, CrdtKind::GSet, StoreConfig::default()).await;
        let mut events = f.store.subscribe();

        let outcome = add(&f, "a").await;
        assert_eq!(outcome, SaveOutcome::Applied(VectorClock::single(peer(1), 1)));
        add(&f, "b").await;

        assert_eq!(f.store.latest_clock().await.unwrap(), VectorClock::single(peer(1), 2));
        assert_eq!(f.store.sequence(), 2);
        assert_eq!(f.shared.value(), CrdtValue::Text("ab".into()));
        assert!(f.store.state("collab").await.unwrap().is_some());
        assert!(f.kv.get(&delta_key(1)).await.unwrap().is_some());

        assert!(matches!(events.recv().await.unwrap(), StoreEvent::Delta { .. }));
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::ClockChanged(VectorClock::single(peer(1), 1))
        );
        assert!(matches!(events.recv().await.unwrap(), StoreEvent::StateChanged { .. }));
    }

    #[tokio::test]
    async fn test_optimistic_write_rejected() {
        let keys = Arc::new(CollaborationKeys::generate());
        let f = fixture(1, &keys, CrdtKind::GSet, StoreConfig::default()).await;
        add(&f, "a").await;

        let stale = VectorClock::new();
        let payload = f.shared.mutate(Mutation::Add("b".into())).unwrap();
        let outcome = f
            .store
            .save_delta(Some(stale), Some(VectorClock::single(peer(2), 1)), payload)
            .await
            .unwrap();
        assert_eq!(outcome, SaveOutcome::NotApplied);
        assert_eq!(f.store.sequence(), 1);
        assert_eq!(f.shared.value(), CrdtValue::Text("a".into()));
    }

    #[tokio::test]
    async fn test_delta_stream_causal_replay() {
        let keys = Arc::new(CollaborationKeys::generate());
        let f = fixture(1, &keys, CrdtKind::GSet, StoreConfig::default()).await;
        for e in ["a", "b", "c"] {
            add(&f, e).await;
        }

        let all: Vec<_> = f.store.delta_stream(&VectorClock::new()).await.unwrap().collect();
        assert_eq!(all.len(), 3);
        let mut watermark = VectorClock::new();
        for record in &all {
            assert!(record.previous_clock.is_identical(&watermark));
            watermark = record.next_clock();
        }

        let tail: Vec<_> = f
            .store
            .delta_stream(&VectorClock::single(peer(1), 2))
            .await
            .unwrap()
            .collect();
        assert_eq!(tail.len(), 1);

        let latest = f.store.latest_clock().await.unwrap();
        assert_eq!(f.store.delta_stream(&latest).await.unwrap().count(), 0);

        let unrelated = VectorClock::single(peer(9), 4);
        assert_eq!(f.store.delta_stream(&unrelated).await.unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_replicated_deltas_converge() {
        let keys = Arc::new(CollaborationKeys::generate());
        let a = fixture(1, &keys, CrdtKind::GSet, StoreConfig::default()).await;
        let b = fixture(2, &keys, CrdtKind::GSet, StoreConfig::default()).await;
        add(&a, "x").await;
        add(&a, "y").await;

        let since = b.store.latest_clock().await.unwrap();
        for record in a.store.delta_stream(&since).await.unwrap() {
            let outcome = b
                .store
                .save_delta(Some(record.previous_clock), Some(record.author_clock), record.payload)
                .await
                .unwrap();
            assert!(outcome.is_applied());
        }
        assert_eq!(b.shared.value(), CrdtValue::Text("xy".into()));
        assert_eq!(
            b.store.latest_clock().await.unwrap(),
            a.store.latest_clock().await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_delta_batch_is_chained() {
        let keys = Arc::new(CollaborationKeys::generate());
        let a = fixture(1, &keys, CrdtKind::GCounter, StoreConfig::default()).await;
        let b = fixture(2, &keys, CrdtKind::GCounter, StoreConfig::default()).await;
        for _ in 0..3 {
            let payload = a.shared.mutate(Mutation::Increment(2)).unwrap();
            a.store.save_delta(None, None, payload).await.unwrap();
        }

        let batch = a.store.delta_batch(&VectorClock::new()).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert!(batch[0].previous_clock.is_empty());
        assert_eq!(batch[0].author_clock, VectorClock::single(peer(1), 3));

        for record in batch {
            b.store
                .save_delta(Some(record.previous_clock), Some(record.author_clock), record.payload)
                .await
                .unwrap();
        }
        assert_eq!(b.shared.value().as_counter(), Some(6));
        assert_eq!(b.store.latest_clock().await.unwrap(), VectorClock::single(peer(1), 3));
    }

    #[tokio::test]
    async fn test_save_states_skips_known_clock() {
        let keys = Arc::new(CollaborationKeys::generate());
        let a = fixture(1, &keys, CrdtKind::GSet, StoreConfig::default()).await;
        let b = fixture(2, &keys, CrdtKind::GSet, StoreConfig::default()).await;
        add(&a, "s").await;

        let (clock, states) = a.store.clock_and_states().await.unwrap();
        assert_eq!(
            b.store.save_states(Some(clock.clone()), &states).await.unwrap(),
            Some(clock.clone())
        );
        assert_eq!(b.shared.value(), CrdtValue::Text("s".into()));
        assert!(b.store.contains(&clock).await.unwrap());

        assert_eq!(b.store.save_states(Some(clock), &states).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_states_without_clock_is_a_local_event() {
        let keys = Arc::new(CollaborationKeys::generate());
        let a = fixture(1, &keys, CrdtKind::GSet, StoreConfig::default()).await;
        let clock = a.store.save_states(None, &StateMap::new()).await.unwrap();
        assert_eq!(clock, Some(VectorClock::single(peer(1), 1)));
    }

    #[tokio::test]
    async fn test_trim_keeps_retention_window() {
        let keys = Arc::new(CollaborationKeys::generate());
        let config = StoreConfig::default()
            .with_max_delta_retention(2)
            .with_delta_trim_timeout(Duration::from_secs(60));
        let f = fixture(1, &keys, CrdtKind::GSet, config).await;
        for e in ["a", "b", "c", "d", "e"] {
            add(&f, e).await;
        }

        assert_eq!(f.store.trim_deltas().await.unwrap(), 2);
        assert!(f.kv.get(&delta_key(2)).await.unwrap().is_none());
        assert!(f.kv.get(&delta_key(3)).await.unwrap().is_some());
        assert!(f.kv.get(KEY_CLOCK).await.unwrap().is_some());
        assert!(f.kv.get(KEY_SEQ).await.unwrap().is_some());
        assert_eq!(f.store.trim_deltas().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_values_are_encrypted_at_rest() {
        let keys = Arc::new(CollaborationKeys::generate());
        let f = fixture(1, &keys, CrdtKind::GSet, StoreConfig::default()).await;
        add(&f, "secret").await;

        let raw = f.kv.get(KEY_CLOCK).await.unwrap().unwrap();
        let right = keys.cipher();
        assert_eq!(
            decode_value::<VectorClock>(Some(right.as_ref()), &raw).unwrap(),
            VectorClock::single(peer(1), 1)
        );

        let other = ChaChaCipher::new(&ChaChaCipher::generate_key());
        assert!(decode_value::<VectorClock>(Some(&other as &dyn Cipher), &raw).is_err());
    }

    #[tokio::test]
    async fn test_restart_restores_state() {
        let keys = Arc::new(CollaborationKeys::generate());
        let f = fixture(1, &keys, CrdtKind::GSet, StoreConfig::default()).await;
        add(&f, "kept").await;

        let store = CollaborationStore::new(
            peer(1),
            "collab",
            f.kv.clone(),
            Some(keys.cipher()),
            StoreConfig::default(),
        );
        let shared = Arc::new(Shared::new("collab", CrdtKind::GSet, peer(1), Arc::clone(&keys)));
        store.set_shared(Arc::clone(&shared));
        store.start().await.unwrap();
        assert_eq!(store.sequence(), 1);
        assert_eq!(shared.value(), CrdtValue::Text("kept".into()));
    }

    #[test]
    fn test_delta_key_format() {
        assert_eq!(delta_key(26), "/d:0000000000000000001a");
        assert_eq!(delta_seq(&delta_key(26)), Some(26));
        assert_eq!(delta_seq("/clock"), None);
    }
}
