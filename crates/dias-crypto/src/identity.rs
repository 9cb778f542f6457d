//! Node identity using Ed25519

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use dias_core::{PeerId, PeerInfo};

/// Identity keypair for a node
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
    peer_id: PeerId,
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Create identity from existing secret key bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(bytes))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let peer_id = derive_peer_id(signing_key.verifying_key().as_bytes());
        Identity {
            signing_key,
            peer_id,
        }
    }

    /// Get the verifying key bytes (public)
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// PeerInfo advertising the given addresses
    pub fn peer_info<I, S>(&self, addrs: I) -> PeerInfo
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PeerInfo::new(self.peer_id).with_addrs(addrs)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

/// PeerId of a public key (SHA-256 of the key bytes)
pub fn derive_peer_id(public_key: &[u8]) -> PeerId {
    let mut hasher = Sha256::new();
    hasher.update(public_key);
    PeerId::from_bytes(hasher.finalize().into())
}
