//! DIAS Crypto - Identities and payload protection
//!
//! Provides the cryptographic primitives the overlay consumes:
//! - Node identity (Ed25519), from which the PeerId is derived
//! - The `Cipher` interface and a ChaCha20-Poly1305 implementation
//! - Collaboration keys that sign then encrypt shared-object deltas

pub mod cipher;
pub mod identity;
pub mod keys;

pub use cipher::*;
pub use identity::*;
pub use keys::*;
