//! Conversion between in-memory [`Structure`]s and storable [`Record`]s.

use super::error::{DbError, Result};
use super::record::{Record, Scalar};
use crate::core::models::calculator::{ALL_PROPERTIES, CalculatorRegistry, SinglePointCalculator};
use crate::core::models::constraint::Constraint;
use crate::core::models::structure::Structure;
use nalgebra::{Matrix3, Point3, Vector3};
use rand::Rng;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::env;

const UNIQUE_ID_MIN: u128 = 1 << 124;

/// A fresh 32-digit lowercase hexadecimal identifier.
pub fn new_unique_id() -> String {
    let id = rand::thread_rng().gen_range(UNIQUE_ID_MIN..=u128::MAX);
    format!("{id:x}")
}

/// Encodes the geometry, optional per-atom arrays and constraints of `structure`.
///
/// Bookkeeping fields are left empty; see [`collect_data`] for the full write-time record.
pub fn encode(structure: &Structure) -> Record {
    let cell = structure.cell();
    Record {
        id: None,
        unique_id: new_unique_id(),
        numbers: structure.numbers().to_vec(),
        positions: structure.positions().iter().map(|p| [p.x, p.y, p.z]).collect(),
        cell: [0, 1, 2].map(|row| [cell[(row, 0)], cell[(row, 1)], cell[(row, 2)]]),
        pbc: structure.pbc(),
        magmoms: structure.magmoms().map(<[f64]>::to_vec),
        charges: structure.charges().map(<[f64]>::to_vec),
        masses: structure.masses().map(<[f64]>::to_vec),
        tags: structure.tags().map(<[i64]>::to_vec),
        momenta: structure
            .momenta()
            .map(|m| m.iter().map(|v| [v.x, v.y, v.z]).collect()),
        constraints: structure
            .constraints()
            .iter()
            .map(Constraint::to_descriptor)
            .collect(),
        keywords: BTreeSet::new(),
        key_value_pairs: BTreeMap::new(),
        data: Default::default(),
        timestamp: 0.0,
        username: None,
        calculator_name: None,
        calculator_parameters: None,
        properties: BTreeMap::new(),
    }
}

/// Assembles the record written for `structure` at `timestamp`.
///
/// Adds the current user and, when a calculator is attached, its name and parameters. Results
/// are only stored if the calculator reports them valid for this structure. NaN and infinite
/// coordinates, per-atom values or timestamps are refused with [`DbError::InvalidValue`].
pub fn collect_data(structure: &Structure, timestamp: f64) -> Result<Record> {
    check_finite("timestamp", [timestamp])?;
    let mut record = encode(structure);
    check_finite("positions", record.positions.iter().flatten().copied())?;
    check_finite("cell", record.cell.iter().flatten().copied())?;
    for (name, values) in [
        ("magmoms", &record.magmoms),
        ("charges", &record.charges),
        ("masses", &record.masses),
    ] {
        check_finite(name, values.iter().flatten().copied())?;
    }
    check_finite("momenta", record.momenta.iter().flatten().flatten().copied())?;

    record.timestamp = timestamp;
    record.username = env::var("USER").ok();

    if let Some(calc) = structure.calculator() {
        record.calculator_name = Some(calc.name().to_lowercase());
        record.calculator_parameters = Some(calc.parameters());
        if calc.check_state(structure).is_empty() {
            record.properties = known_properties(calc.results());
        }
    }
    Ok(record)
}

/// Refuses key-value pairs holding a NaN or infinite float; JSON has no spelling for them.
pub fn check_key_value_pairs(pairs: &BTreeMap<String, Scalar>) -> Result<()> {
    for (key, value) in pairs {
        if let Scalar::Float(x) = value {
            check_finite(key, [*x])?;
        }
    }
    Ok(())
}

fn check_finite(what: &str, values: impl IntoIterator<Item = f64>) -> Result<()> {
    match values.into_iter().find(|x| !x.is_finite()) {
        Some(x) => Err(DbError::InvalidValue(format!("{what} holds non-finite number {x}"))),
        None => Ok(()),
    }
}

fn known_properties(results: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    ALL_PROPERTIES
        .iter()
        .filter_map(|&name| results.get(name).map(|v| (name.to_string(), v.clone())))
        .collect()
}

/// Rebuilds a [`Structure`] from `record`.
///
/// With `attach_calculator`, a live calculator is constructed through `registry`; otherwise the
/// stored results (if any) come back on a [`SinglePointCalculator`].
pub fn decode(
    record: &Record,
    attach_calculator: bool,
    registry: &CalculatorRegistry,
) -> Result<Structure> {
    let invalid = |e: &dyn std::fmt::Display| DbError::Decode(e.to_string());

    let positions = record.positions.iter().copied().map(Point3::from).collect();
    let cell = Matrix3::from_fn(|i, j| record.cell[i][j]);
    let mut structure = Structure::new(record.numbers.clone(), positions)
        .map_err(|e| invalid(&e))?
        .with_cell(cell, record.pbc);

    structure
        .set_magmoms(record.magmoms.clone())
        .map_err(|e| invalid(&e))?;
    structure
        .set_charges(record.charges.clone())
        .map_err(|e| invalid(&e))?;
    structure
        .set_masses(record.masses.clone())
        .map_err(|e| invalid(&e))?;
    structure
        .set_tags(record.tags.clone())
        .map_err(|e| invalid(&e))?;
    structure
        .set_momenta(
            record
                .momenta
                .as_ref()
                .map(|m| m.iter().copied().map(Vector3::from).collect()),
        )
        .map_err(|e| invalid(&e))?;

    let constraints = record
        .constraints
        .iter()
        .map(Constraint::from_descriptor)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| invalid(&e))?;
    structure
        .set_constraints(constraints)
        .map_err(|e| invalid(&e))?;

    if attach_calculator {
        let name = record
            .calculator_name
            .as_deref()
            .ok_or_else(|| DbError::Decode("record has no calculator".into()))?;
        let parameters = record.calculator_parameters.clone().unwrap_or_default();
        let calc = registry
            .create(name, &parameters)
            .ok_or_else(|| DbError::UnknownCalculator(name.to_string()))?
            .map_err(DbError::Decode)?;
        structure.set_calculator(Some(calc));
    } else {
        let results = known_properties(&record.properties);
        if !results.is_empty() {
            let calc = SinglePointCalculator::new(&structure, results);
            structure.set_calculator(Some(Box::new(calc)));
        }
    }

    Ok(structure)
}
