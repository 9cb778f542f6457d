//! Membership gossip messages
//!
//! Wire format (CBOR array):
//! - Summary: `[topic, digest:text, typeName]`
//! - Full: `[topic, membershipState:bytes, typeName]`
//!
//! The topic is the collaboration name.

use ciborium::Value;
use serde_bytes::Bytes;

use dias_core::{DiasError, DiasResult};

use crate::codec::{decode_array, encode};

/// Membership payload carried by a gossip message
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteMembership {
    /// Digest of the sender's sorted member list
    Summary(String),
    /// Encoded membership CRDT state
    Full(Vec<u8>),
}

/// A gossip message about one collaboration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GossipMessage {
    pub topic: String,
    pub membership: RemoteMembership,
    pub type_name: String,
}

impl GossipMessage {
    pub fn summary(
        topic: impl Into<String>,
        digest: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        GossipMessage {
            topic: topic.into(),
            membership: RemoteMembership::Summary(digest.into()),
            type_name: type_name.into(),
        }
    }

    pub fn full(topic: impl Into<String>, state: Vec<u8>, type_name: impl Into<String>) -> Self {
        GossipMessage {
            topic: topic.into(),
            membership: RemoteMembership::Full(state),
            type_name: type_name.into(),
        }
    }

    pub fn is_summary(&self) -> bool {
        matches!(self.membership, RemoteMembership::Summary(_))
    }

    pub fn encode(&self) -> DiasResult<Vec<u8>> {
        match &self.membership {
            RemoteMembership::Summary(digest) => encode(&(&self.topic, digest, &self.type_name)),
            RemoteMembership::Full(state) => {
                encode(&(&self.topic, Bytes::new(state), &self.type_name))
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> DiasResult<Self> {
        let items = decode_array(bytes, "gossip message")?;
        if items.len() != 3 {
            return Err(DiasError::Decode(format!(
                "gossip message has {} elements, expected 3",
                items.len()
            )));
        }

        let topic = text(&items[0], "gossip topic")?;
        let type_name = text(&items[2], "gossip type name")?;
        let membership = match &items[1] {
            Value::Text(digest) => RemoteMembership::Summary(digest.clone()),
            Value::Bytes(state) => RemoteMembership::Full(state.clone()),
            _ => return Err(DiasError::Decode("gossip membership must be text or bytes".into())),
        };

        Ok(GossipMessage {
            topic,
            membership,
            type_name,
        })
    }
}

fn text(value: &Value, what: &str) -> DiasResult<String> {
    match value {
        Value::Text(s) => Ok(s.clone()),
        _ => Err(DiasError::Decode(format!("{} must be text", what))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_and_full_are_distinguished() {
        let summary = GossipMessage::summary("doc", "abc=", "gset");
        let decoded = GossipMessage::decode(&summary.encode().unwrap()).unwrap();
        assert_eq!(decoded, summary);
        assert!(decoded.is_summary());

        let full = GossipMessage::full("doc", vec![1, 2, 3], "gset");
        let decoded = GossipMessage::decode(&full.encode().unwrap()).unwrap();
        assert_eq!(decoded.membership, RemoteMembership::Full(vec![1, 2, 3]));
        assert!(!decoded.is_summary());
    }

    #[test]
    fn test_malformed_gossip_rejected() {
        assert!(GossipMessage::decode(b"not cbor at all").is_err());
        let two = encode(&("doc", "digest")).unwrap();
        assert!(GossipMessage::decode(&two).is_err());
        let wrong = encode(&("doc", 12u32, "gset")).unwrap();
        assert!(GossipMessage::decode(&wrong).is_err());
    }
}
