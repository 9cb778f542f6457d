//! DIAS CRDT - Convergent replicated data types
//!
//! Delta-state CRDTs: every mutator returns a small delta state which is
//! merged with the same `join` used for full states. Joins are commutative,
//! associative and idempotent.
//!
//! - `DotContext`: causal context of observed writes
//! - `GSet`: grow-only set of strings
//! - `GCounter`: grow-only counter
//! - `MvRegister`: multi-value register
//! - `OrMap`: observed-remove map of multi-value registers
//! - `CrdtState`: the closed set of types a shared object can use

pub mod dot;
pub mod gset;
pub mod gcounter;
pub mod mvreg;
pub mod ormap;
pub mod kind;

pub use dot::*;
pub use gset::*;
pub use gcounter::*;
pub use mvreg::*;
pub use ormap::*;
pub use kind::*;
