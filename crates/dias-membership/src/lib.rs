//! DIAS Membership - Who takes part in a collaboration
//!
//! - `Membership`: OR-Map of member addresses, merged from gossip, feeding
//!   the collaboration ring
//! - `CollaborationConnectionManager`: keeps replication streams open to
//!   the Dias set of the collaboration ring
//! - `GossipHeuristic`: adaptive membership gossip interval
//! - `membership_digest`: short summary used to detect divergence

pub mod config;
pub mod digest;
pub mod heuristic;
pub mod connection_manager;
pub mod membership;

pub use config::*;
pub use digest::*;
pub use heuristic::*;
pub use connection_manager::*;
pub use membership::*;
