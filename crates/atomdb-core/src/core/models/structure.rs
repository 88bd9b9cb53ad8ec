use super::calculator::Calculator;
use super::constraint::Constraint;
use nalgebra::{Matrix3, Point3, Vector3};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StructureError {
    #[error("Array '{name}' has {actual} entries but the structure has {expected} atoms")]
    LengthMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Constraint {0} references an atom outside the structure")]
    ConstraintOutOfRange(&'static str),
}

/// An atomic configuration: species, Cartesian positions, lattice and boundary conditions,
/// plus optional per-atom arrays, constraints and an attached calculator.
///
/// The lattice vectors are the rows of `cell`. A zero cell is valid for molecules.
#[derive(Debug, Default)]
pub struct Structure {
    numbers: Vec<u8>,
    positions: Vec<Point3<f64>>,
    cell: Matrix3<f64>,
    pbc: [bool; 3],
    magmoms: Option<Vec<f64>>,
    charges: Option<Vec<f64>>,
    masses: Option<Vec<f64>>,
    tags: Option<Vec<i64>>,
    momenta: Option<Vec<Vector3<f64>>>,
    constraints: Vec<Constraint>,
    calculator: Option<Box<dyn Calculator>>,
    /// Side-channel metadata, filled by the database when asked for bookkeeping fields.
    pub info: BTreeMap<String, Value>,
}

impl Structure {
    /// Creates a non-periodic structure with a zero cell.
    pub fn new(numbers: Vec<u8>, positions: Vec<Point3<f64>>) -> Result<Self, StructureError> {
        check_len("positions", numbers.len(), positions.len())?;
        Ok(Self {
            numbers,
            positions,
            ..Self::default()
        })
    }

    pub fn with_cell(mut self, cell: Matrix3<f64>, pbc: [bool; 3]) -> Self {
        self.cell = cell;
        self.pbc = pbc;
        self
    }

    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }

    pub fn numbers(&self) -> &[u8] {
        &self.numbers
    }

    pub fn positions(&self) -> &[Point3<f64>] {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut [Point3<f64>] {
        &mut self.positions
    }

    pub fn cell(&self) -> &Matrix3<f64> {
        &self.cell
    }

    pub fn pbc(&self) -> [bool; 3] {
        self.pbc
    }

    pub fn magmoms(&self) -> Option<&[f64]> {
        self.magmoms.as_deref()
    }

    pub fn charges(&self) -> Option<&[f64]> {
        self.charges.as_deref()
    }

    pub fn masses(&self) -> Option<&[f64]> {
        self.masses.as_deref()
    }

    pub fn tags(&self) -> Option<&[i64]> {
        self.tags.as_deref()
    }

    pub fn momenta(&self) -> Option<&[Vector3<f64>]> {
        self.momenta.as_deref()
    }

    pub fn set_magmoms(&mut self, magmoms: Option<Vec<f64>>) -> Result<(), StructureError> {
        check_optional_len("magmoms", self.len(), magmoms.as_ref().map(Vec::len))?;
        self.magmoms = magmoms;
        Ok(())
    }

    pub fn set_charges(&mut self, charges: Option<Vec<f64>>) -> Result<(), StructureError> {
        check_optional_len("charges", self.len(), charges.as_ref().map(Vec::len))?;
        self.charges = charges;
        Ok(())
    }

    pub fn set_masses(&mut self, masses: Option<Vec<f64>>) -> Result<(), StructureError> {
        check_optional_len("masses", self.len(), masses.as_ref().map(Vec::len))?;
        self.masses = masses;
        Ok(())
    }

    pub fn set_tags(&mut self, tags: Option<Vec<i64>>) -> Result<(), StructureError> {
        check_optional_len("tags", self.len(), tags.as_ref().map(Vec::len))?;
        self.tags = tags;
        Ok(())
    }

    pub fn set_momenta(&mut self, momenta: Option<Vec<Vector3<f64>>>) -> Result<(), StructureError> {
        check_optional_len("momenta", self.len(), momenta.as_ref().map(Vec::len))?;
        self.momenta = momenta;
        Ok(())
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn set_constraints(&mut self, constraints: Vec<Constraint>) -> Result<(), StructureError> {
        if let Some(bad) = constraints.iter().find(|c| c.is_out_of_range(self.len())) {
            return Err(StructureError::ConstraintOutOfRange(bad.type_name()));
        }
        self.constraints = constraints;
        Ok(())
    }

    pub fn calculator(&self) -> Option<&dyn Calculator> {
        self.calculator.as_deref()
    }

    pub fn set_calculator(&mut self, calculator: Option<Box<dyn Calculator>>) {
        self.calculator = calculator;
    }
}

fn check_len(name: &'static str, expected: usize, actual: usize) -> Result<(), StructureError> {
    if expected != actual {
        return Err(StructureError::LengthMismatch {
            name,
            expected,
            actual,
        });
    }
    Ok(())
}

fn check_optional_len(
    name: &'static str,
    expected: usize,
    actual: Option<usize>,
) -> Result<(), StructureError> {
    match actual {
        Some(actual) => check_len(name, expected, actual),
        None => Ok(()),
    }
}
