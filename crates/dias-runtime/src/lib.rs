//! DIAS Runtime - Running a node
//!
//! - `App`: bootstraps the application transport, routes membership gossip
//!   to collaborations and optionally pins collaborations it hears about
//! - `Collaboration`: store, replication protocol and membership of one
//!   shared CRDT, with a typed `SharedHandle` for local mutations
//! - `AppConfig` / `CollaborationConfig`: JSON-loadable settings
//! - `init_tracing`: subscriber setup driven by `DIAS_LOG`

pub mod config;
pub mod telemetry;
pub mod collaboration;
pub mod app;

pub use config::*;
pub use telemetry::*;
pub use collaboration::*;
pub use app::*;
