//! The closed set of CRDT types a shared object can use
//!
//! The type is chosen when a collaboration is created and travels on the
//! wire by name (`gset`, `gcounter`, `mvreg`, `ormap`).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use dias_core::{DiasError, DiasResult, PeerId};

use crate::{GCounter, GSet, MvRegister, OrMap};

/// Supported CRDT types
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrdtKind {
    GSet,
    GCounter,
    MvReg,
    OrMap,
}

impl CrdtKind {
    pub fn type_name(self) -> &'static str {
        match self {
            CrdtKind::GSet => "gset",
            CrdtKind::GCounter => "gcounter",
            CrdtKind::MvReg => "mvreg",
            CrdtKind::OrMap => "ormap",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "gset" => Some(CrdtKind::GSet),
            "gcounter" => Some(CrdtKind::GCounter),
            "mvreg" => Some(CrdtKind::MvReg),
            "ormap" => Some(CrdtKind::OrMap),
            _ => None,
        }
    }
}

impl fmt::Display for CrdtKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl FromStr for CrdtKind {
    type Err = DiasError;

    fn from_str(s: &str) -> DiasResult<Self> {
        CrdtKind::from_type_name(s)
            .ok_or_else(|| DiasError::Config(format!("unknown CRDT type {:?}", s)))
    }
}

/// A mutation requested by the application
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    /// GSet: add an element
    Add(String),
    /// GCounter: increment
    Increment(u64),
    /// MvReg: overwrite the value
    Write(Vec<u8>),
    /// OrMap: set a key
    Insert(String, Vec<u8>),
    /// OrMap: remove a key
    Remove(String),
}

impl Mutation {
    fn name(&self) -> &'static str {
        match self {
            Mutation::Add(_) => "add",
            Mutation::Increment(_) => "increment",
            Mutation::Write(_) => "write",
            Mutation::Insert(..) => "insert",
            Mutation::Remove(_) => "remove",
        }
    }
}

/// Resolved value of a shared object
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CrdtValue {
    Text(String),
    Counter(u64),
    Values(Vec<Vec<u8>>),
    Map(BTreeMap<String, Vec<Vec<u8>>>),
}

impl CrdtValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CrdtValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_counter(&self) -> Option<u64> {
        match self {
            CrdtValue::Counter(n) => Some(*n),
            _ => None,
        }
    }
}

/// State (or delta) of one shared object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrdtState {
    GSet(GSet),
    GCounter(GCounter),
    MvReg(MvRegister<serde_bytes::ByteBuf>),
    OrMap(OrMap<String, serde_bytes::ByteBuf>),
}

impl CrdtState {
    pub fn initial(kind: CrdtKind) -> Self {
        match kind {
            CrdtKind::GSet => CrdtState::GSet(GSet::new()),
            CrdtKind::GCounter => CrdtState::GCounter(GCounter::new()),
            CrdtKind::MvReg => CrdtState::MvReg(MvRegister::new()),
            CrdtKind::OrMap => CrdtState::OrMap(OrMap::new()),
        }
    }

    pub fn kind(&self) -> CrdtKind {
        match self {
            CrdtState::GSet(_) => CrdtKind::GSet,
            CrdtState::GCounter(_) => CrdtKind::GCounter,
            CrdtState::MvReg(_) => CrdtKind::MvReg,
            CrdtState::OrMap(_) => CrdtKind::OrMap,
        }
    }

    /// Produce the delta for a mutation without applying it
    pub fn mutate(&self, replica: PeerId, mutation: Mutation) -> DiasResult<CrdtState> {
        let delta = match (self, mutation) {
            (CrdtState::GSet(s), Mutation::Add(e)) => CrdtState::GSet(s.add(e)),
            (CrdtState::GCounter(c), Mutation::Increment(by)) => {
                CrdtState::GCounter(c.increment(replica, by))
            }
            (CrdtState::MvReg(r), Mutation::Write(v)) => {
                CrdtState::MvReg(r.write(replica, serde_bytes::ByteBuf::from(v)))
            }
            (CrdtState::OrMap(m), Mutation::Insert(k, v)) => {
                CrdtState::OrMap(m.write(replica, k, serde_bytes::ByteBuf::from(v)))
            }
            (CrdtState::OrMap(m), Mutation::Remove(k)) => CrdtState::OrMap(m.remove(&k)),
            (state, mutation) => {
                return Err(DiasError::UnsupportedOperation {
                    kind: state.kind().to_string(),
                    op: mutation.name().to_string(),
                })
            }
        };
        Ok(delta)
    }

    /// Merge another state or delta of the same type
    pub fn join(&mut self, other: &CrdtState) -> DiasResult<()> {
        match (self, other) {
            (CrdtState::GSet(a), CrdtState::GSet(b)) => a.join(b),
            (CrdtState::GCounter(a), CrdtState::GCounter(b)) => a.join(b),
            (CrdtState::MvReg(a), CrdtState::MvReg(b)) => a.join(b),
            (CrdtState::OrMap(a), CrdtState::OrMap(b)) => a.join(b),
            (a, b) => {
                return Err(DiasError::UnexpectedMessage(format!(
                    "cannot join {} with {}",
                    a.kind(),
                    b.kind()
                )))
            }
        }
        Ok(())
    }

    pub fn value(&self) -> CrdtValue {
        match self {
            CrdtState::GSet(s) => CrdtValue::Text(s.value()),
            CrdtState::GCounter(c) => CrdtValue::Counter(c.value()),
            CrdtState::MvReg(r) => {
                CrdtValue::Values(r.values().into_iter().map(|v| v.to_vec()).collect())
            }
            CrdtState::OrMap(m) => CrdtValue::Map(
                m.value()
                    .into_iter()
                    .map(|(k, vs)| (k, vs.into_iter().map(|v| v.into_vec()).collect()))
                    .collect(),
            ),
        }
    }

    pub fn encode(&self) -> DiasResult<Vec<u8>> {
        dias_wire::encode(self)
    }

    pub fn decode(bytes: &[u8]) -> DiasResult<Self> {
        dias_wire::decode(bytes)
    }
}
