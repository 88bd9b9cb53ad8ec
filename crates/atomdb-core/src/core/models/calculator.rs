use super::structure::Structure;
use nalgebra::{Matrix3, Point3};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Property names a calculator may report and the database knows how to persist.
pub const ALL_PROPERTIES: [&str; 7] = [
    "energy", "forces", "stress", "dipole", "charges", "magmom", "magmoms",
];

/// An energy/force provider attached to a [`Structure`].
///
/// The database only needs to identify the calculator, persist its parameters,
/// and read back results that are still valid for the structure being written.
pub trait Calculator: fmt::Debug + Send {
    /// Identifier used to look the calculator up in a [`CalculatorRegistry`].
    fn name(&self) -> &str;

    /// Constructor parameters, sufficient to rebuild an equivalent calculator.
    fn parameters(&self) -> Map<String, Value>;

    /// Lists the parts of the system state that changed since the results were computed.
    ///
    /// An empty list means the cached results are valid for `structure`.
    fn check_state(&self, structure: &Structure) -> Vec<&'static str>;

    /// Cached results keyed by property name.
    fn results(&self) -> &BTreeMap<String, Value>;
}

#[derive(Debug, Clone, PartialEq)]
struct SystemSnapshot {
    numbers: Vec<u8>,
    positions: Vec<Point3<f64>>,
    cell: Matrix3<f64>,
    pbc: [bool; 3],
}

impl SystemSnapshot {
    fn of(structure: &Structure) -> Self {
        Self {
            numbers: structure.numbers().to_vec(),
            positions: structure.positions().to_vec(),
            cell: *structure.cell(),
            pbc: structure.pbc(),
        }
    }
}

/// A calculator that only holds a fixed set of results for one configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SinglePointCalculator {
    snapshot: SystemSnapshot,
    results: BTreeMap<String, Value>,
}

impl SinglePointCalculator {
    pub fn new(structure: &Structure, results: BTreeMap<String, Value>) -> Self {
        Self {
            snapshot: SystemSnapshot::of(structure),
            results,
        }
    }
}

impl Calculator for SinglePointCalculator {
    fn name(&self) -> &str {
        "unknown"
    }

    fn parameters(&self) -> Map<String, Value> {
        Map::new()
    }

    fn check_state(&self, structure: &Structure) -> Vec<&'static str> {
        let mut changes = Vec::new();
        if self.snapshot.numbers != structure.numbers() {
            changes.push("numbers");
        }
        if self.snapshot.positions != structure.positions() {
            changes.push("positions");
        }
        if self.snapshot.cell != *structure.cell() {
            changes.push("cell");
        }
        if self.snapshot.pbc != structure.pbc() {
            changes.push("pbc");
        }
        changes
    }

    fn results(&self) -> &BTreeMap<String, Value> {
        &self.results
    }
}

pub type CalculatorFactory =
    Box<dyn Fn(&Map<String, Value>) -> Result<Box<dyn Calculator>, String> + Send + Sync>;

/// Maps calculator names to constructors.
#[derive(Default)]
pub struct CalculatorRegistry {
    factories: HashMap<String, CalculatorFactory>,
}

impl CalculatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor under `name` (stored lowercase), replacing any previous entry.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Map<String, Value>) -> Result<Box<dyn Calculator>, String> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.to_ascii_lowercase(), Box::new(factory));
    }

    /// Builds a calculator by name. Returns `None` when the name is not registered.
    pub fn create(
        &self,
        name: &str,
        parameters: &Map<String, Value>,
    ) -> Option<Result<Box<dyn Calculator>, String>> {
        self.factories
            .get(&name.to_ascii_lowercase())
            .map(|factory| factory(parameters))
    }
}

impl fmt::Debug for CalculatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("CalculatorRegistry")
            .field("names", &names)
            .finish()
    }
}
