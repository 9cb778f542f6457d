//! DIAS test harness
//!
//! This crate provides:
//! - Replicas: collaboration stores wired directly through the replication protocol
//! - Swarms: whole nodes running on an in-memory network
//! - Polling helpers for asynchronous convergence
//!
//! Scenario tests live in `tests/`, benchmarks in `benches/`.

pub mod eventually;
pub mod replica;
pub mod swarm;

pub use eventually::*;
pub use replica::*;
pub use swarm::*;
