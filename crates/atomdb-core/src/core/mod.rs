//! # Core Module
//!
//! Stateless building blocks shared by the database layer: the atomic structure
//! model consumed by the serialization codec, and the periodic table used to
//! translate element symbols in selections.

pub mod elements;
pub mod models;
