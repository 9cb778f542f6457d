//! DIAS Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout the DIAS overlay:
//! - Identifiers (PeerId, PeerInfo)
//! - Vector clocks used for causal bookkeeping
//! - Delta records persisted and replicated by collaboration stores
//! - The shared error type

pub mod id;
pub mod clock;
pub mod delta;
pub mod error;

pub use id::*;
pub use clock::*;
pub use delta::*;
pub use error::*;
