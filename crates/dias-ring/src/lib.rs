//! DIAS Ring - Where a peer sits and who it must talk to
//!
//! - `Ring`: ordered set of known peers, emitting a change event per mutation
//! - `RingSnapshot`: immutable view used for computations
//! - `DiasSet`: pure selection of the bounded neighbour set

pub mod config;
pub mod ring;
pub mod dias;

pub use config::*;
pub use ring::*;
pub use dias::*;
