//! DIAS Wire - Message encoding
//!
//! Every message exchanged between peers is a CBOR array:
//! - Gossip membership messages (summary digest or full CRDT state)
//! - Replication protocol messages (presentation, delta, clock/state push)
//! - Shared-object delta payloads carried inside delta records

pub mod codec;
pub mod gossip;
pub mod payload;
pub mod replication;

pub use codec::*;
pub use gossip::*;
pub use payload::*;
pub use replication::*;
