//! DIAS Protocol - Replication between collaboration replicas
//!
//! Each protocol stream has a pushing end (the dialer) and a pulling end
//! (the handler):
//! - the puller presents its clock and tells the pusher whether it wants
//!   deltas (eager) or only clock heartbeats (lazy)
//! - the pusher tracks the puller's clock and sends the deltas it misses,
//!   falling back to full states when the delta log does not cover the gap
//!
//! `Clocks` holds the last known clock of every remote replica.

pub mod clocks;
pub mod protocol;
pub mod push;
pub mod pull;

pub use clocks::*;
pub use protocol::*;
pub use push::*;
pub use pull::*;
