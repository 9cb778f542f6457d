//! DIAS Time - Timing primitives
//!
//! - `Debouncer`: a pending flag plus one scheduled wake-up; repeated
//!   triggers while a run is pending collapse into that run
//! - `PeriodicTask`: runs an action on a fixed interval until dropped
//! - `jitter`: random delay bounded by a maximum

pub mod debounce;
pub mod periodic;
pub mod jitter;

pub use debounce::*;
pub use periodic::*;
pub use jitter::*;
