//! # atomdb
//!
//! A persistent database of atomic structures.
//!
//! ## Architecture
//!
//! - **[`core`]: The Foundation.** The `Structure` model (positions, cell, constraints,
//!   attached calculator) and the periodic table.
//!
//! - **[`db`]: The Store.** Record serialization, the selection language, storage backends,
//!   advisory file locking and the rank-0 broadcast protocol for cooperating process groups,
//!   composed into the public `write`/`get`/`select`/`update` operations of [`db::Database`].
//!
//! ```ignore
//! use atomdb::db::{connect, ConnectOptions, Entry, Query};
//!
//! let mut db = connect(Some("structures.db"), ConnectOptions::default())?;
//! let id = db.write(&structure, Entry::new().keyword("relaxed").pair("T", 300))?;
//! for record in db.select(Query::new("H>1,age<2d")) {
//!     println!("{}", record?.formula());
//! }
//! ```

pub mod core;
pub mod db;
