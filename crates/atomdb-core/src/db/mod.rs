//! # Database Module
//!
//! The public face of the crate. [`connect`] picks a backend from the database name and
//! returns a [`Database`], whose operations compose four concerns:
//!
//! - [`codec`] turns structures into records and back.
//! - [`expression`] parses selections into keywords and normalized comparisons.
//! - [`lock`] serializes writers through an advisory file lock.
//! - [`collective`] lets only rank 0 of a process group touch storage and broadcasts the
//!   outcome to the others.

pub mod backend;
pub mod codec;
pub mod collective;
pub mod duration;
pub mod error;
pub mod expression;
pub mod lock;
pub mod record;

mod connect;
mod database;

pub use backend::{Backend, BackendHandle};
pub use collective::{Communicator, LocalGroup, SerialCommunicator};
pub use connect::{BackendType, ConnectOptions, ConnectOptionsBuilder, connect};
pub use database::{Database, Entry, UpdateCounts};
pub use error::{DbError, Result};
pub use expression::{Operator, Query, Selection, Term};
pub use record::{Record, Scalar};
