//! # Structure Models
//!
//! The atomic-structure interface the database serializes: species, positions,
//! lattice, periodic flags, optional per-atom arrays, constraints and an attached
//! calculator.
//!
//! - [`structure`] - The [`Structure`](structure::Structure) container
//! - [`constraint`] - Constraint objects and their tagged storage descriptors
//! - [`calculator`] - The calculator abstraction, single-point results and the name registry

pub mod calculator;
pub mod constraint;
pub mod structure;
