use super::{open, query_for};
use crate::cli::UpdateArgs;
use crate::config::FileConfig;
use crate::error::{CliError, Result};
use atomdb::core::elements;
use atomdb::db::backend::matcher::NAMED_COLUMNS;
use atomdb::db::{Database, Scalar, UpdateCounts};
use std::collections::BTreeMap;
use tracing::info;

pub fn run(args: UpdateArgs, config: &FileConfig) -> Result<()> {
    let pairs = parse_pairs(&args.set)?;
    let mut db = open(&args.database, config)?;
    let (records, counts) = apply(&mut db, &args.selection, &args.add_keywords, &pairs)?;
    println!(
        "Updated {records} record(s): {} keyword(s) added, {:+} key-value pair(s).",
        counts.keywords_added, counts.key_value_net_change
    );
    Ok(())
}

/// Turns `KEY=VALUE` arguments into typed pairs, refusing keys that could never be searched.
fn parse_pairs(set: &[(String, String)]) -> Result<BTreeMap<String, Scalar>> {
    let mut pairs = BTreeMap::new();
    for (key, value) in set {
        if NAMED_COLUMNS.contains(&key.as_str()) || key == "age" {
            return Err(CliError::Argument(format!("'{key}' is a reserved column name")));
        }
        if elements::is_element_symbol(key) {
            return Err(CliError::Argument(format!(
                "'{key}' is a chemical symbol and cannot be used as a key"
            )));
        }
        if !key.chars().all(|c| c.is_alphanumeric() || c == '_')
            || key.starts_with(|c: char| c.is_ascii_digit())
        {
            return Err(CliError::Argument(format!("'{key}' is not a valid key")));
        }
        let value = match value.parse::<Scalar>() {
            Ok(value) => value,
            Err(never) => match never {},
        };
        pairs.insert(key.clone(), value);
    }
    Ok(pairs)
}

fn apply(
    db: &mut Database,
    selection: &str,
    add_keywords: &[String],
    pairs: &BTreeMap<String, Scalar>,
) -> Result<(usize, UpdateCounts)> {
    let ids = db
        .select(query_for(Some(selection)))
        .map(|record| record.map(|r| r.id.unwrap_or_default()))
        .collect::<atomdb::db::Result<Vec<u64>>>()?;
    if ids.is_empty() {
        info!(selection, "Nothing to update.");
        return Ok((0, UpdateCounts::default()));
    }
    let counts = db.update(&ids, add_keywords, pairs)?;
    Ok((ids.len(), counts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing;
    use atomdb::db::{ConnectOptions, Query, connect};
    use tempfile::tempdir;

    fn set(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn values_are_typed() {
        let pairs = parse_pairs(&set(&[("T", "300"), ("ok", "true"), ("x", "1.5"), ("tag", "a b")]))
            .unwrap();
        assert_eq!(pairs["T"], Scalar::Int(300));
        assert_eq!(pairs["ok"], Scalar::Bool(true));
        assert_eq!(pairs["x"], Scalar::Float(1.5));
        assert_eq!(pairs["tag"], Scalar::Text("a b".into()));

        let pairs = parse_pairs(&set(&[("x", "nan"), ("y", "inf")])).unwrap();
        assert_eq!(pairs["x"], Scalar::Text("nan".into()));
        assert_eq!(pairs["y"], Scalar::Text("inf".into()));
    }

    #[test]
    fn reserved_and_malformed_keys_are_refused() {
        for key in ["energy", "id", "age", "Fe", "2x", "a-b"] {
            assert!(
                matches!(parse_pairs(&set(&[(key, "1")])), Err(CliError::Argument(_))),
                "{key}"
            );
        }
    }

    #[test]
    fn matching_records_are_updated_together() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("u.db");
        let mut db = connect(path.to_str(), ConnectOptions::default()).unwrap();
        testing::populate(&mut db);

        let pairs = parse_pairs(&set(&[("T", "350"), ("checked", "yes")])).unwrap();
        let (records, counts) =
            apply(&mut db, "relaxed", &["done".to_string()], &pairs).unwrap();
        assert_eq!(records, 2);
        assert_eq!(counts.keywords_added, 2);
        // water already had T, methane had neither
        assert_eq!(counts.key_value_net_change, 3);

        assert_eq!(db.count(Query::new("done,T=350,checked=yes")).unwrap(), 2);
        let water = db.get(Query::new(1u64)).unwrap();
        assert_eq!(water.timestamp, 20.0);
    }

    #[test]
    fn a_bare_number_updates_that_record_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("u.json");
        let mut db = connect(path.to_str(), ConnectOptions::default()).unwrap();
        testing::populate(&mut db);

        let (records, counts) = apply(&mut db, "3", &["metal".to_string()], &BTreeMap::new()).unwrap();
        assert_eq!(records, 1);
        assert_eq!(counts.keywords_added, 1);
        assert_eq!(db.get(Query::new("metal")).unwrap().id, Some(3));
    }

    #[test]
    fn empty_selection_changes_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("u.json");
        let mut db = connect(path.to_str(), ConnectOptions::default()).unwrap();
        testing::populate(&mut db);

        let (records, counts) = apply(&mut db, "natoms>100", &[], &BTreeMap::new()).unwrap();
        assert_eq!(records, 0);
        assert_eq!(counts, UpdateCounts::default());
    }
}
