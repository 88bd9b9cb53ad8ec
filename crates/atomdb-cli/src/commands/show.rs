use super::{open, query_for};
use crate::cli::ShowArgs;
use crate::config::FileConfig;
use crate::error::Result;
use atomdb::db::duration::{self, float_to_time_string};
use atomdb::db::{Database, Record};
use std::io::{self, Write};

pub fn run(args: ShowArgs, config: &FileConfig) -> Result<()> {
    let db = open(&args.database, config)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    show(&db, &args.selection, duration::now(), &mut out)
}

fn show<W: Write>(db: &Database, selection: &str, now: f64, out: &mut W) -> Result<()> {
    let record = db.get(query_for(Some(selection)))?;
    describe(&record, now, out)
}

fn describe<W: Write>(record: &Record, now: f64, out: &mut W) -> Result<()> {
    let field = |name: &str, value: &dyn std::fmt::Display| format!("{name:<18}{value}");

    if let Some(id) = record.id {
        writeln!(out, "{}", field("id", &id))?;
    }
    writeln!(out, "{}", field("unique_id", &record.unique_id))?;
    writeln!(out, "{}", field("formula", &record.formula()))?;
    writeln!(out, "{}", field("natoms", &record.natoms()))?;
    writeln!(
        out,
        "{}",
        field("age", &float_to_time_string(now - record.timestamp))
    )?;
    if let Some(user) = &record.username {
        writeln!(out, "{}", field("user", user))?;
    }
    if let Some(calculator) = &record.calculator_name {
        writeln!(out, "{}", field("calculator", calculator))?;
    }
    if let Some(energy) = record.energy() {
        writeln!(out, "{}", field("energy", &energy))?;
    }
    if record.pbc.iter().any(|&p| p) {
        let pbc: Vec<&str> = record
            .pbc
            .iter()
            .map(|&p| if p { "T" } else { "F" })
            .collect();
        writeln!(out, "{}", field("pbc", &pbc.join("")))?;
        for (axis, row) in ["a", "b", "c"].iter().zip(record.cell.iter()) {
            writeln!(
                out,
                "{}",
                field(
                    &format!("cell {axis}"),
                    &format!("{:>10.4} {:>10.4} {:>10.4}", row[0], row[1], row[2])
                )
            )?;
        }
    }
    if !record.keywords.is_empty() {
        let keywords: Vec<&str> = record.keywords.iter().map(String::as_str).collect();
        writeln!(out, "{}", field("keywords", &keywords.join(", ")))?;
    }
    for (key, value) in &record.key_value_pairs {
        writeln!(out, "{}", field(key, value))?;
    }
    if !record.data.is_empty() {
        writeln!(out, "data:")?;
        writeln!(out, "{}", serde_json::to_string_pretty(&record.data).map_err(anyhow::Error::from)?)?;
    }
    Ok(())
}
