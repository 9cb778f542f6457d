//! Replication protocol messages
//!
//! Wire format (CBOR array per message):
//! - Presentation: `[clock | null, startLazy, startEager]`
//! - Delta push: `[[previousClock, authorClock, payload]]`
//! - State push: `[null, [clock, {name: bytes}]]`
//! - Heartbeat: `[null, [clock]]`

use std::collections::BTreeMap;

use ciborium::Value;
use serde_bytes::{ByteBuf, Bytes};

use dias_core::{DeltaRecord, DiasError, DiasResult, VectorClock};

use crate::codec::{decode_array, encode, from_value};

/// Named CRDT states, each encoded
pub type StateMap = BTreeMap<String, Vec<u8>>;

/// One message on a replication stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplicationMessage {
    /// Receiver tells the sender what it has and how it wants to be fed
    Presentation {
        clock: Option<VectorClock>,
        start_lazy: bool,
        start_eager: bool,
    },
    /// A single delta (or a batch folded into one record)
    Delta(DeltaRecord),
    /// Full states, or just the sender's clock when `states` is `None`
    State {
        clock: VectorClock,
        states: Option<StateMap>,
    },
}

impl ReplicationMessage {
    pub fn presentation(clock: Option<VectorClock>) -> Self {
        ReplicationMessage::Presentation {
            clock,
            start_lazy: false,
            start_eager: false,
        }
    }

    pub fn start_lazy(clock: Option<VectorClock>) -> Self {
        ReplicationMessage::Presentation {
            clock,
            start_lazy: true,
            start_eager: false,
        }
    }

    pub fn start_eager(clock: Option<VectorClock>) -> Self {
        ReplicationMessage::Presentation {
            clock,
            start_lazy: false,
            start_eager: true,
        }
    }

    pub fn heartbeat(clock: VectorClock) -> Self {
        ReplicationMessage::State { clock, states: None }
    }

    pub fn encode(&self) -> DiasResult<Vec<u8>> {
        match self {
            ReplicationMessage::Presentation {
                clock,
                start_lazy,
                start_eager,
            } => encode(&(clock, start_lazy, start_eager)),
            ReplicationMessage::Delta(record) => encode(&(record,)),
            ReplicationMessage::State { clock, states: None } => {
                encode(&(Option::<()>::None, (clock,)))
            }
            ReplicationMessage::State {
                clock,
                states: Some(states),
            } => {
                let states: BTreeMap<&str, &Bytes> = states
                    .iter()
                    .map(|(name, state)| (name.as_str(), Bytes::new(state)))
                    .collect();
                encode(&(Option::<()>::None, (clock, states)))
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> DiasResult<Self> {
        let items = decode_array(bytes, "replication message")?;
        match items.len() {
            3 => {
                let clock = if items[0].is_null() {
                    None
                } else {
                    Some(from_value(&items[0], "presentation clock")?)
                };
                Ok(ReplicationMessage::Presentation {
                    clock,
                    start_lazy: flag(&items[1])?,
                    start_eager: flag(&items[2])?,
                })
            }
            1 => Ok(ReplicationMessage::Delta(from_value(&items[0], "delta record")?)),
            2 if items[0].is_null() => {
                let inner = items[1]
                    .as_array()
                    .ok_or_else(|| DiasError::Decode("state push body is not an array".into()))?;
                let clock = inner
                    .first()
                    .ok_or_else(|| DiasError::Decode("state push without clock".into()))
                    .and_then(|v| from_value(v, "state push clock"))?;
                let states = match inner.get(1) {
                    None => None,
                    Some(v) => {
                        let raw: BTreeMap<String, ByteBuf> = from_value(v, "state map")?;
                        Some(raw.into_iter().map(|(k, v)| (k, v.into_vec())).collect())
                    }
                };
                Ok(ReplicationMessage::State { clock, states })
            }
            n => Err(DiasError::Decode(format!(
                "unexpected replication message of {} elements",
                n
            ))),
        }
    }
}

fn flag(value: &Value) -> DiasResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        _ => Err(DiasError::Decode("presentation flag must be a boolean".into())),
    }
}
