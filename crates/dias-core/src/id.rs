//! Identity types for the DIAS overlay
//!
//! A peer is identified by the SHA-256 digest of its public key. The raw
//! bytes give the total order used on the ring; the base58 string is the
//! canonical text form used on the wire and in logs.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::{DiasError, DiasResult};

/// Length of a peer identifier in bytes
pub const PEER_ID_LEN: usize = 32;

/// Peer identity - hash of the peer's public key
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    pub const ZERO: PeerId = PeerId([0u8; PEER_ID_LEN]);

    #[inline]
    pub fn from_bytes(bytes: [u8; PEER_ID_LEN]) -> Self {
        PeerId(bytes)
    }

    /// Build an id from a slice, failing if the length is wrong
    pub fn from_slice(bytes: &[u8]) -> DiasResult<Self> {
        let arr: [u8; PEER_ID_LEN] = bytes
            .try_into()
            .map_err(|_| {
                DiasError::InvalidPeerId(format!(
                    "expected {} bytes, got {}",
                    PEER_ID_LEN,
                    bytes.len()
                ))
            })?;
        Ok(PeerId(arr))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }

    /// Leading bytes used to bucket peers on the ring
    #[inline]
    pub fn preamble(&self, len: usize) -> &[u8] {
        &self.0[..len.min(PEER_ID_LEN)]
    }

    /// Canonical base58 string
    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    /// Parse the canonical base58 string
    pub fn from_base58(s: &str) -> DiasResult<Self> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| DiasError::InvalidPeerId(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.to_base58();
        write!(f, "Peer({})", &s[..s.len().min(8)])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl FromStr for PeerId {
    type Err = DiasError;

    fn from_str(s: &str) -> DiasResult<Self> {
        PeerId::from_base58(s)
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PeerIdVisitor;

        impl<'de> Visitor<'de> for PeerIdVisitor {
            type Value = PeerId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a base58 peer id")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<PeerId, E> {
                PeerId::from_base58(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(PeerIdVisitor)
    }
}

/// A peer together with the addresses it can be dialed on
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addrs: BTreeSet<String>,
}

impl PeerInfo {
    pub fn new(id: PeerId) -> Self {
        PeerInfo {
            id,
            addrs: BTreeSet::new(),
        }
    }

    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addrs.insert(addr.into());
        self
    }

    pub fn with_addrs<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addrs.extend(addrs.into_iter().map(Into::into));
        self
    }

    /// Addresses in their canonical (sorted) order
    pub fn sorted_addrs(&self) -> Vec<String> {
        self.addrs.iter().cloned().collect()
    }

    #[inline]
    pub fn has_addrs(&self) -> bool {
        !self.addrs.is_empty()
    }
}
