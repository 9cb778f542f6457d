//! Shared-object delta payloads
//!
//! The payload of a delta record names the shared object it belongs to, the
//! CRDT type, and carries the sealed (signed then encrypted) delta body:
//! `[sharedName, typeName, body:bytes]`.

use serde::{Deserialize, Serialize};

use dias_core::DiasResult;

use crate::codec::{decode, encode};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedPayload(
    pub String,
    pub String,
    #[serde(with = "serde_bytes")] pub Vec<u8>,
);

impl SharedPayload {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, body: Vec<u8>) -> Self {
        SharedPayload(name.into(), type_name.into(), body)
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn type_name(&self) -> &str {
        &self.1
    }

    pub fn body(&self) -> &[u8] {
        &self.2
    }

    pub fn encode(&self) -> DiasResult<Vec<u8>> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> DiasResult<Self> {
        decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_accessors() {
        let payload = SharedPayload::new("root", "gset", vec![9, 9]);
        let decoded = SharedPayload::decode(&payload.encode().unwrap()).unwrap();
        assert_eq!(decoded.name(), "root");
        assert_eq!(decoded.type_name(), "gset");
        assert_eq!(decoded.body(), &[9, 9]);
    }
}
