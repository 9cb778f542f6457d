//! Shared CRDT objects
//!
//! A `Shared` is one named object of a collaboration. Local mutations are
//! turned into sealed delta payloads; the store feeds payloads and remote
//! states back in, and the object keeps the merged state.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use dias_core::{DiasError, DiasResult, PeerId};
use dias_crdt::{CrdtKind, CrdtState, CrdtValue, Mutation};
use dias_crypto::CollaborationKeys;
use dias_wire::SharedPayload;

/// A named CRDT of a collaboration
pub struct Shared {
    name: String,
    kind: CrdtKind,
    replica: PeerId,
    keys: Arc<CollaborationKeys>,
    state: RwLock<CrdtState>,
}

impl Shared {
    pub fn new(
        name: impl Into<String>,
        kind: CrdtKind,
        replica: PeerId,
        keys: Arc<CollaborationKeys>,
    ) -> Self {
        Shared {
            name: name.into(),
            kind,
            replica,
            keys,
            state: RwLock::new(CrdtState::initial(kind)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CrdtKind {
        self.kind
    }

    pub fn keys(&self) -> &Arc<CollaborationKeys> {
        &self.keys
    }

    /// Encoded delta payload for a local mutation. The state is left
    /// untouched until the store applies the payload.
    pub fn mutate(&self, mutation: Mutation) -> DiasResult<Vec<u8>> {
        let delta = self.state.read().mutate(self.replica, mutation)?;
        self.seal(&delta)?.encode()
    }

    /// Sign and encrypt a delta (or joined batch of deltas) of this object
    pub fn seal(&self, delta: &CrdtState) -> DiasResult<SharedPayload> {
        if delta.kind() != self.kind {
            return Err(DiasError::UnexpectedMessage(format!(
                "{} delta for {} object {}",
                delta.kind(),
                self.kind,
                self.name
            )));
        }
        let body = self.keys.sign_and_encrypt(&delta.encode()?)?;
        Ok(SharedPayload::new(self.name.clone(), self.kind.type_name(), body))
    }

    /// Decrypt, verify and decode the delta carried by a payload
    pub fn open(&self, payload: &SharedPayload) -> DiasResult<CrdtState> {
        if payload.type_name() != self.kind.type_name() {
            return Err(DiasError::UnexpectedMessage(format!(
                "payload of type {} for {} object {}",
                payload.type_name(),
                self.kind,
                self.name
            )));
        }
        let body = self.keys.decrypt_and_verify(payload.body())?;
        CrdtState::decode(&body)
    }

    /// Merge a delta payload. Returns the new encoded state, or `None` if
    /// the payload belongs to another object.
    pub fn apply(&self, payload: &SharedPayload) -> DiasResult<Option<Vec<u8>>> {
        if payload.name() != self.name {
            return Ok(None);
        }
        let delta = self.open(payload)?;
        let mut state = self.state.write();
        state.join(&delta)?;
        debug!(shared = %self.name, "applied delta");
        Ok(Some(state.encode()?))
    }

    /// Merge a full encoded state. Returns the new encoded state.
    pub fn apply_state(&self, encoded: &[u8]) -> DiasResult<Vec<u8>> {
        let remote = CrdtState::decode(encoded)?;
        let mut state = self.state.write();
        state.join(&remote)?;
        state.encode()
    }

    /// Encoded current state
    pub fn encoded_state(&self) -> DiasResult<Vec<u8>> {
        self.state.read().encode()
    }

    pub fn value(&self) -> CrdtValue {
        self.state.read().value()
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}
