//! DIAS Transport - Connectivity below the collaborations
//!
//! The overlay consumes the network through narrow traits (`Transport`,
//! `PubSub`). On top of them this crate provides:
//! - `MemoryNetwork`: in-process implementation of both traits
//! - `GlobalConnectionManager`: the only component allowed to hang up
//! - `Reconciler`: the Dias-set reconciliation pass shared by all managers
//! - `AppConnectionManager`, `Discovery`, `Gossip` and `AppTransport`

pub mod interface;
pub mod memory;
pub mod peer_set;
pub mod global;
pub mod reconcile;
pub mod connection_manager;
pub mod discovery;
pub mod gossip;
pub mod app_transport;

pub use interface::*;
pub use memory::*;
pub use peer_set::*;
pub use global::*;
pub use reconcile::*;
pub use connection_manager::*;
pub use discovery::*;
pub use gossip::*;
pub use app_transport::*;
