//! SQLite storage.
//!
//! Every record is kept whole as JSON in `systems.record`; the searchable parts are copied
//! into columns and side tables so selections compile to a single SQL query:
//!
//! - `systems`: one row per record with the named columns.
//! - `keywords`: `(keyword, id)`.
//! - `key_value`: `(key, text, number, id)`, with strings in `text` and everything else in
//!   `number` (booleans as 0 and 1).
//! - `species`: `(Z, n, id)`, the atom count per atomic number.

use super::matcher::NAMED_COLUMNS;
use super::{Backend, RecordIter};
use crate::db::error::{DbError, Result};
use crate::db::expression::{Comparison, Key, Operand, Operator};
use crate::db::record::{Record, Scalar};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Transaction, params, params_from_iter};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS systems (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    unique_id TEXT UNIQUE NOT NULL,
    timestamp REAL NOT NULL,
    username TEXT,
    calculator_name TEXT,
    energy REAL,
    natoms INTEGER NOT NULL,
    record TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS keywords (
    keyword TEXT NOT NULL,
    id INTEGER NOT NULL REFERENCES systems(id)
);
CREATE TABLE IF NOT EXISTS key_value (
    key TEXT NOT NULL,
    text TEXT,
    number REAL,
    id INTEGER NOT NULL REFERENCES systems(id)
);
CREATE TABLE IF NOT EXISTS species (
    Z INTEGER NOT NULL,
    n INTEGER NOT NULL,
    id INTEGER NOT NULL REFERENCES systems(id)
);
";

const INDICES: &str = "
CREATE INDEX IF NOT EXISTS unique_id_index ON systems(unique_id);
CREATE INDEX IF NOT EXISTS timestamp_index ON systems(timestamp);
CREATE INDEX IF NOT EXISTS keyword_index ON keywords(keyword);
CREATE INDEX IF NOT EXISTS key_value_number_index ON key_value(key, number);
CREATE INDEX IF NOT EXISTS key_value_text_index ON key_value(key, text);
CREATE INDEX IF NOT EXISTS species_index ON species(Z);
";

const NUMERIC_COLUMNS: [&str; 4] = ["id", "timestamp", "natoms", "energy"];

#[derive(Debug)]
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Opens (creating if needed) the database file at `path`.
    pub fn open(path: impl AsRef<Path>, create_indices: bool) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), create_indices, "Opened SQLite database.");
        Self::bootstrap(conn, create_indices)
    }

    pub fn open_in_memory(create_indices: bool) -> Result<Self> {
        Self::bootstrap(Connection::open_in_memory()?, create_indices)
    }

    fn bootstrap(conn: Connection, create_indices: bool) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        if create_indices {
            conn.execute_batch(INDICES)?;
        }
        Ok(Self { conn })
    }

    fn exists(tx: &Transaction<'_>, id: i64) -> Result<bool> {
        Ok(tx
            .query_row("SELECT 1 FROM systems WHERE id = ?1", [id], |_| Ok(()))
            .optional()?
            .is_some())
    }
}

fn insert_search_rows(tx: &Transaction<'_>, id: i64, record: &Record) -> Result<()> {
    for keyword in &record.keywords {
        tx.execute(
            "INSERT INTO keywords (keyword, id) VALUES (?1, ?2)",
            params![keyword, id],
        )?;
    }

    for (key, value) in &record.key_value_pairs {
        match value {
            Scalar::Text(text) => tx.execute(
                "INSERT INTO key_value (key, text, number, id) VALUES (?1, ?2, NULL, ?3)",
                params![key, text, id],
            )?,
            other => tx.execute(
                "INSERT INTO key_value (key, text, number, id) VALUES (?1, NULL, ?2, ?3)",
                params![key, other.as_f64(), id],
            )?,
        };
    }

    let mut counts: BTreeMap<u8, i64> = BTreeMap::new();
    for &z in &record.numbers {
        *counts.entry(z).or_default() += 1;
    }
    for (z, n) in counts {
        tx.execute(
            "INSERT INTO species (Z, n, id) VALUES (?1, ?2, ?3)",
            params![z, n, id],
        )?;
    }
    Ok(())
}

fn numeric(value: &Operand) -> Option<Value> {
    match value {
        Operand::Number(x) => Some(Value::Real(*x)),
        Operand::Integer(i) => Some(Value::Integer(*i)),
        Operand::Text(_) => None,
    }
}

/// Translates keywords and comparisons into a `SELECT` of matching ids plus its arguments.
fn compile(keywords: &BTreeSet<String>, comparisons: &[Comparison]) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut args: Vec<Value> = Vec::new();

    for keyword in keywords {
        clauses.push("systems.id IN (SELECT id FROM keywords WHERE keyword = ?)".into());
        args.push(Value::Text(keyword.clone()));
    }

    for comparison in comparisons {
        let op = comparison.op.as_str();
        let equality = matches!(comparison.op, Operator::Eq | Operator::Ne);
        match (&comparison.key, &comparison.value) {
            (Key::Element(z), value) => match numeric(value) {
                Some(n) => {
                    clauses.push(format!(
                        "COALESCE((SELECT n FROM species \
                         WHERE species.id = systems.id AND species.Z = ?), 0) {op} ?"
                    ));
                    args.push(Value::Integer(i64::from(*z)));
                    args.push(n);
                }
                None => clauses.push("0".into()),
            },
            (Key::Name(name), Operand::Text(text)) => {
                if !equality || NUMERIC_COLUMNS.contains(&name.as_str()) {
                    clauses.push("0".into());
                } else if NAMED_COLUMNS.contains(&name.as_str()) {
                    clauses.push(format!("systems.{name} {op} ?"));
                    args.push(Value::Text(text.clone()));
                } else {
                    clauses.push(format!(
                        "systems.id IN (SELECT id FROM key_value WHERE key = ? AND text {op} ?)"
                    ));
                    args.push(Value::Text(name.clone()));
                    args.push(Value::Text(text.clone()));
                }
            }
            (Key::Name(name), value) => {
                let Some(number) = numeric(value) else {
                    clauses.push("0".into());
                    continue;
                };
                if NUMERIC_COLUMNS.contains(&name.as_str()) {
                    clauses.push(format!("systems.{name} {op} ?"));
                    args.push(number);
                } else if NAMED_COLUMNS.contains(&name.as_str()) {
                    clauses.push("0".into());
                } else {
                    clauses.push(format!(
                        "systems.id IN (SELECT id FROM key_value WHERE key = ? AND number {op} ?)"
                    ));
                    args.push(Value::Text(name.clone()));
                    args.push(number);
                }
            }
        }
    }

    let mut sql = String::from("SELECT systems.id FROM systems");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY systems.id");
    (sql, args)
}

impl Backend for SqliteBackend {
    fn raw_write(&mut self, mut record: Record) -> Result<u64> {
        let requested = record.id.take();
        let tx = self.conn.transaction()?;

        let existing = match requested {
            Some(id) if Self::exists(&tx, id as i64)? => Some(id as i64),
            _ => None,
        };
        let body = serde_json::to_string(&record)?;
        let columns = params![
            record.unique_id,
            record.timestamp,
            record.username,
            record.calculator_name,
            record.energy(),
            record.natoms() as i64,
            body,
        ];

        let id = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE systems SET unique_id = ?1, timestamp = ?2, username = ?3, \
                     calculator_name = ?4, energy = ?5, natoms = ?6, record = ?7 WHERE id = ?8",
                    [columns, params![id]].concat().as_slice(),
                )?;
                for table in ["keywords", "key_value", "species"] {
                    tx.execute(&format!("DELETE FROM {table} WHERE id = ?1"), [id])?;
                }
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO systems \
                     (unique_id, timestamp, username, calculator_name, energy, natoms, record) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    columns,
                )?;
                tx.last_insert_rowid()
            }
        };

        insert_search_rows(&tx, id, &record)?;
        tx.commit()?;
        debug!(id, replaced = existing.is_some(), "Stored record.");
        Ok(id as u64)
    }

    fn raw_select<'a>(
        &'a self,
        keywords: &BTreeSet<String>,
        comparisons: &[Comparison],
        explain: bool,
        verbosity: u8,
    ) -> Result<RecordIter<'a>> {
        let (sql, args) = compile(keywords, comparisons);
        if verbosity >= 2 {
            debug!(%sql, args = args.len(), "Compiled selection.");
        }

        if explain {
            let mut plan = self.conn.prepare(&format!("EXPLAIN QUERY PLAN {sql}"))?;
            let details = plan.query_map(params_from_iter(args.iter()), |row| {
                row.get::<_, String>(3)
            })?;
            for detail in details {
                info!(detail = %detail?, "Query plan.");
            }
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(args.iter()), |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(Box::new(
            ids.into_iter().map(move |id| self.get_record(id as u64)),
        ))
    }

    fn get_record(&self, id: u64) -> Result<Record> {
        let body: String = self
            .conn
            .query_row(
                "SELECT record FROM systems WHERE id = ?1",
                [id as i64],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| DbError::NotFound(format!("id={id}")))?;
        let mut record: Record = serde_json::from_str(&body)?;
        record.id = Some(id);
        Ok(record)
    }
}
