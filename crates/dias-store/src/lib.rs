//! DIAS Store - Collaboration persistence
//!
//! - `KvStore`: narrow key-value interface, with the in-memory `MemoryKv`
//! - `DatastoreRegistry`: one key-value store per collaboration name
//! - `Shared`: a named CRDT object holding its merged state
//! - `CollaborationStore`: clock, delta log and states of a collaboration

pub mod config;
pub mod kv;
pub mod shared;
pub mod store;

pub use config::*;
pub use kv::*;
pub use shared::*;
pub use store::*;
