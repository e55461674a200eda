//! # mk-models
//!
//! Stateright models of the concurrency kernels, for exhaustive bounded
//! model checking. The models check the *algorithms*; the runtime crates'
//! loom and stress tests check the *implementations*.

pub mod bakery;

pub use bakery::{BakeryAction, BakeryModel, BakeryState};
