use super::{open, query_for};
use crate::cli::QueryArgs;
use crate::config::FileConfig;
use crate::error::Result;
use atomdb::db::duration::{self, float_to_time_string};
use atomdb::db::{Database, Query, Record};
use std::io::{self, Write};
use tracing::info;

pub fn run(args: QueryArgs, config: &FileConfig) -> Result<()> {
    let limit = config.query_limit(args.limit)?;
    let db = open(&args.database, config)?;
    let query = query_for(args.selection.as_deref()).explain(args.explain);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let shown = list(&db, query, limit, args.long, duration::now(), &mut out)?;
    info!(shown, "Listed records.");
    Ok(())
}

/// Writes one row per matching record and returns how many rows were written.
fn list<W: Write>(
    db: &Database,
    query: Query,
    limit: Option<usize>,
    long: bool,
    now: f64,
    out: &mut W,
) -> Result<usize> {
    write!(out, "{:>5} {:>6} {:<14} {:>12}", "id", "age", "formula", "energy")?;
    if long {
        write!(out, "  {:<24} key-value pairs", "keywords")?;
    }
    writeln!(out)?;

    let mut shown = 0;
    for record in db.select(query).take(limit.unwrap_or(usize::MAX)) {
        let record = record?;
        writeln!(out, "{}", row(&record, long, now))?;
        shown += 1;
    }
    writeln!(out, "Rows: {shown}")?;
    Ok(shown)
}

fn row(record: &Record, long: bool, now: f64) -> String {
    let id = record.id.map(|id| id.to_string()).unwrap_or_default();
    let age = float_to_time_string(now - record.timestamp);
    let energy = record
        .energy()
        .map(|e| format!("{e:.4}"))
        .unwrap_or_default();
    let mut line = format!("{id:>5} {age:>6} {:<14} {energy:>12}", record.formula());
    if long {
        let keywords: Vec<&str> = record.keywords.iter().map(String::as_str).collect();
        let pairs: Vec<String> = record
            .key_value_pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        line.push_str(&format!("  {:<24} {}", keywords.join(","), pairs.join(",")));
    }
    line.trim_end().to_string()
}
