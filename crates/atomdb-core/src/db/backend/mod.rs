//! Storage engines behind a [`Database`](crate::db::Database).

pub mod json;
pub mod matcher;
pub mod null;
pub mod sqlite;

use super::error::Result;
use super::expression::Comparison;
use super::record::Record;
use std::collections::BTreeSet;

pub use json::JsonBackend;
pub use null::NullBackend;
pub use sqlite::SqliteBackend;

/// A lazily produced sequence of records.
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<Record>> + 'a>;

/// The raw storage interface the orchestrator drives.
///
/// Implementations never see selection strings, only parsed keywords and normalized
/// comparisons, and they never coordinate with other processes.
pub trait Backend {
    /// Stores `record`, returning its id.
    ///
    /// A record whose `id` names an existing row replaces that row in place; otherwise a new
    /// id is assigned.
    fn raw_write(&mut self, record: Record) -> Result<u64>;

    /// Yields records carrying every keyword and satisfying every comparison, in id order.
    ///
    /// `explain` asks the backend to log how it will execute the selection.
    fn raw_select<'a>(
        &'a self,
        keywords: &BTreeSet<String>,
        comparisons: &[Comparison],
        explain: bool,
        verbosity: u8,
    ) -> Result<RecordIter<'a>>;

    fn get_record(&self, id: u64) -> Result<Record>;
}

/// The backends [`connect`](crate::db::connect) can build.
#[derive(Debug)]
pub enum BackendHandle {
    Null(NullBackend),
    Json(JsonBackend),
    Sqlite(SqliteBackend),
}

impl Backend for BackendHandle {
    fn raw_write(&mut self, record: Record) -> Result<u64> {
        match self {
            BackendHandle::Null(b) => b.raw_write(record),
            BackendHandle::Json(b) => b.raw_write(record),
            BackendHandle::Sqlite(b) => b.raw_write(record),
        }
    }

    fn raw_select<'a>(
        &'a self,
        keywords: &BTreeSet<String>,
        comparisons: &[Comparison],
        explain: bool,
        verbosity: u8,
    ) -> Result<RecordIter<'a>> {
        match self {
            BackendHandle::Null(b) => b.raw_select(keywords, comparisons, explain, verbosity),
            BackendHandle::Json(b) => b.raw_select(keywords, comparisons, explain, verbosity),
            BackendHandle::Sqlite(b) => b.raw_select(keywords, comparisons, explain, verbosity),
        }
    }

    fn get_record(&self, id: u64) -> Result<Record> {
        match self {
            BackendHandle::Null(b) => b.get_record(id),
            BackendHandle::Json(b) => b.get_record(id),
            BackendHandle::Sqlite(b) => b.get_record(id),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::db::record::{Record, Scalar};
    use std::collections::{BTreeMap, BTreeSet};

    /// A small, varied record set used to check that backends agree on matching.
    pub fn fixture() -> Vec<Record> {
        let base = |numbers: Vec<u8>, timestamp: f64| Record {
            id: None,
            unique_id: crate::db::codec::new_unique_id(),
            positions: vec![[0.0; 3]; numbers.len()],
            numbers,
            cell: [[0.0; 3]; 3],
            pbc: [false; 3],
            magmoms: None,
            charges: None,
            masses: None,
            tags: None,
            momenta: None,
            constraints: Vec::new(),
            keywords: BTreeSet::new(),
            key_value_pairs: BTreeMap::new(),
            data: Default::default(),
            timestamp,
            username: Some("alice".into()),
            calculator_name: None,
            calculator_parameters: None,
            properties: BTreeMap::new(),
        };

        let mut water = base(vec![8, 1, 1], 20.0);
        water.keywords.insert("relaxed".into());
        water
            .key_value_pairs
            .insert("phase".into(), Scalar::from("liquid"));
        water.key_value_pairs.insert("T".into(), Scalar::Int(300));
        water
            .properties
            .insert("energy".into(), serde_json::json!(-14.2));
        water.calculator_name = Some("emt".into());

        let mut methane = base(vec![6, 1, 1, 1, 1], 21.0);
        methane.keywords.insert("relaxed".into());
        methane.keywords.insert("gas".into());
        methane.key_value_pairs.insert("T".into(), Scalar::Float(250.5));
        methane
            .key_value_pairs
            .insert("stable".into(), Scalar::Bool(true));

        let mut copper = base(vec![29; 4], 22.5);
        copper.pbc = [true; 3];
        copper.username = Some("bob".into());
        copper
            .properties
            .insert("energy".into(), serde_json::json!(-3.6));
        copper
            .key_value_pairs
            .insert("phase".into(), Scalar::from("solid"));

        vec![water, methane, copper]
    }

    /// Selections paired with the 1-based fixture positions they should return.
    pub const CASES: &[(&str, &[u64])] = &[
        ("", &[1, 2, 3]),
        ("relaxed", &[1, 2]),
        ("relaxed,gas", &[2]),
        ("H=2", &[1]),
        ("H>1", &[1, 2]),
        ("C=0", &[1, 3]),
        ("Cu!=0", &[3]),
        ("O<1", &[2, 3]),
        ("T>260", &[1]),
        ("T<=300", &[1, 2]),
        ("T!=300", &[2]),
        ("phase=liquid", &[1]),
        ("phase=solid,Cu=4", &[3]),
        ("energy<-5", &[1]),
        ("energy>-5", &[3]),
        ("natoms>=4", &[2, 3]),
        ("id=2", &[2]),
        ("1<id<=3", &[2, 3]),
        ("username=bob", &[3]),
        ("calculator_name=emt", &[1]),
        ("stable=1", &[2]),
        ("stable=1,relaxed", &[2]),
        ("pressure>0", &[]),
        ("timestamp>21", &[3]),
        ("username>1", &[]),
        ("phase>1", &[]),
    ];
}
