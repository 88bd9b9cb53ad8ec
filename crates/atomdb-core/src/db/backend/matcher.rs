use crate::db::expression::{Comparison, Key, Operand, Operator};
use crate::db::record::{Record, Scalar};
use std::collections::BTreeSet;

/// Columns stored directly on a record rather than among its key-value pairs.
pub const NAMED_COLUMNS: [&str; 7] = [
    "id",
    "timestamp",
    "natoms",
    "energy",
    "username",
    "calculator_name",
    "unique_id",
];

/// Returns `true` if `record` carries every keyword and satisfies every comparison.
pub fn matches(record: &Record, keywords: &BTreeSet<String>, comparisons: &[Comparison]) -> bool {
    keywords.iter().all(|k| record.keywords.contains(k))
        && comparisons.iter().all(|c| satisfies(record, c))
}

fn satisfies(record: &Record, comparison: &Comparison) -> bool {
    let actual = match &comparison.key {
        Key::Element(z) => Some(Scalar::Int(record.count_of(*z) as i64)),
        Key::Name(name) => value_of(record, name),
    };
    let Some(actual) = actual else {
        return false;
    };

    match &comparison.value {
        Operand::Text(expected) => match (actual.as_str(), comparison.op) {
            (Some(s), Operator::Eq | Operator::Ne) => comparison.op.evaluate(s, expected.as_str()),
            _ => false,
        },
        Operand::Integer(n) => match actual {
            Scalar::Int(i) => comparison.op.evaluate(&i, n),
            other => other
                .as_f64()
                .is_some_and(|x| comparison.op.evaluate(&x, &(*n as f64))),
        },
        Operand::Number(x) => actual
            .as_f64()
            .is_some_and(|v| comparison.op.evaluate(&v, x)),
    }
}

fn value_of(record: &Record, name: &str) -> Option<Scalar> {
    match name {
        "energy" => record.energy().map(Scalar::Float),
        _ if NAMED_COLUMNS.contains(&name) => record.lookup(name),
        _ => record.key_value_pairs.get(name).cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn water() -> Record {
        Record {
            id: Some(3),
            unique_id: "f".repeat(32),
            numbers: vec![8, 1, 1],
            positions: vec![[0.0; 3]; 3],
            cell: [[0.0; 3]; 3],
            pbc: [false; 3],
            magmoms: None,
            charges: None,
            masses: None,
            tags: None,
            momenta: None,
            constraints: Vec::new(),
            keywords: BTreeSet::from(["relaxed".to_string()]),
            key_value_pairs: BTreeMap::from([
                ("T".to_string(), Scalar::Int(300)),
                ("phase".to_string(), Scalar::from("liquid")),
                ("stable".to_string(), Scalar::Bool(true)),
            ]),
            data: Default::default(),
            timestamp: 20.0,
            username: Some("bob".into()),
            calculator_name: None,
            calculator_parameters: None,
            properties: BTreeMap::from([
                ("energy".to_string(), json!(-14.2)),
                ("magmom".to_string(), json!(0.0)),
            ]),
        }
    }

    fn cmp(key: Key, op: Operator, value: Operand) -> Comparison {
        Comparison::new(key, op, value)
    }

    fn name(s: &str) -> Key {
        Key::Name(s.into())
    }

    #[test]
    fn keywords_must_all_be_present() {
        let r = water();
        assert!(matches(&r, &BTreeSet::from(["relaxed".into()]), &[]));
        assert!(!matches(
            &r,
            &BTreeSet::from(["relaxed".into(), "converged".into()]),
            &[]
        ));
    }

    #[test]
    fn element_counts_default_to_zero() {
        let r = water();
        assert!(satisfies(&r, &cmp(Key::Element(1), Operator::Eq, Operand::Integer(2))));
        assert!(satisfies(&r, &cmp(Key::Element(6), Operator::Eq, Operand::Integer(0))));
        assert!(satisfies(&r, &cmp(Key::Element(6), Operator::Lt, Operand::Integer(1))));
        assert!(!satisfies(&r, &cmp(Key::Element(8), Operator::Gt, Operand::Integer(1))));
    }

    #[test]
    fn named_columns_and_pairs_are_compared_numerically() {
        let r = water();
        assert!(satisfies(&r, &cmp(name("id"), Operator::Eq, Operand::Number(3.0))));
        assert!(satisfies(&r, &cmp(name("natoms"), Operator::Ge, Operand::Number(3.0))));
        assert!(satisfies(&r, &cmp(name("energy"), Operator::Lt, Operand::Number(-10.0))));
        assert!(satisfies(&r, &cmp(name("T"), Operator::Gt, Operand::Number(250.0))));
        assert!(satisfies(&r, &cmp(name("stable"), Operator::Eq, Operand::Number(1.0))));
    }

    #[test]
    fn strings_only_match_on_equality() {
        let r = water();
        assert!(satisfies(&r, &cmp(name("phase"), Operator::Eq, Operand::Text("liquid".into()))));
        assert!(satisfies(&r, &cmp(name("username"), Operator::Eq, Operand::Text("bob".into()))));
        assert!(!satisfies(&r, &cmp(name("phase"), Operator::Lt, Operand::Text("z".into()))));
        assert!(!satisfies(&r, &cmp(name("phase"), Operator::Gt, Operand::Number(0.0))));
        assert!(!satisfies(&r, &cmp(name("T"), Operator::Eq, Operand::Text("300".into()))));
    }

    #[test]
    fn missing_keys_never_match() {
        let r = water();
        assert!(!satisfies(&r, &cmp(name("pressure"), Operator::Ne, Operand::Number(1.0))));
        assert!(!satisfies(&r, &cmp(name("calculator_name"), Operator::Ne, Operand::Text("emt".into()))));
        assert!(!satisfies(&r, &cmp(name("magmom"), Operator::Eq, Operand::Number(0.0))));
    }
}
