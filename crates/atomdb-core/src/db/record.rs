use crate::core::elements;
use crate::core::models::constraint::ConstraintDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// A value in a record's `key_value_pairs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Numeric view used by comparisons; booleans count as 0 and 1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(i) => Value::from(*i),
            Scalar::Float(f) => Value::from(*f),
            Scalar::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl FromStr for Scalar {
    type Err = Infallible;

    /// Interprets command-line text: booleans, then integers, then finite floats, else a string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "true" | "True" => Scalar::Bool(true),
            "false" | "False" => Scalar::Bool(false),
            _ => {
                if let Ok(i) = s.parse::<i64>() {
                    Scalar::Int(i)
                } else if let Some(f) = s.parse::<f64>().ok().filter(|f| f.is_finite()) {
                    Scalar::Float(f)
                } else {
                    Scalar::Text(s.to_string())
                }
            }
        })
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(v.into())
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

/// A stored structure plus its bookkeeping metadata.
///
/// Known fields are plain struct fields; [`Record::get`] offers generic key lookup that also
/// reaches computed properties and user key-value pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Backend row id; `None` until the record has been written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub unique_id: String,
    pub numbers: Vec<u8>,
    pub positions: Vec<[f64; 3]>,
    pub cell: [[f64; 3]; 3],
    pub pbc: [bool; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magmoms: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charges: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub masses: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub momenta: Option<Vec<[f64; 3]>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<ConstraintDescriptor>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub keywords: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub key_value_pairs: BTreeMap<String, Scalar>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
    /// Years since 2000-01-01, see [`crate::db::duration::T0`].
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculator_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculator_parameters: Option<Map<String, Value>>,
    /// Calculator results (energy, forces, ...) keyed by property name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
}

impl Record {
    pub fn natoms(&self) -> usize {
        self.numbers.len()
    }

    pub fn formula(&self) -> String {
        elements::hill_formula(&self.numbers)
    }

    pub fn energy(&self) -> Option<f64> {
        self.properties.get("energy").and_then(Value::as_f64)
    }

    /// Number of atoms with the given atomic number.
    pub fn count_of(&self, number: u8) -> usize {
        self.numbers.iter().filter(|&&z| z == number).count()
    }

    /// Generic lookup over named fields, then computed properties, then key-value pairs.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(scalar) = self.named_field(key) {
            return Some(scalar.to_json());
        }
        if let Some(value) = self.properties.get(key) {
            return Some(value.clone());
        }
        self.key_value_pairs.get(key).map(Scalar::to_json)
    }

    /// Scalar lookup used when matching comparisons.
    ///
    /// Non-scalar properties (forces, stress, ...) are not comparable and yield `None`.
    pub fn lookup(&self, key: &str) -> Option<Scalar> {
        if let Some(scalar) = self.named_field(key) {
            return Some(scalar);
        }
        if let Some(value) = self.properties.get(key) {
            return value.as_f64().map(Scalar::Float);
        }
        self.key_value_pairs.get(key).cloned()
    }

    fn named_field(&self, key: &str) -> Option<Scalar> {
        match key {
            "id" => self.id.map(|id| Scalar::Int(id as i64)),
            "unique_id" => Some(Scalar::Text(self.unique_id.clone())),
            "timestamp" => Some(Scalar::Float(self.timestamp)),
            "natoms" => Some(Scalar::Int(self.natoms() as i64)),
            "username" => self.username.clone().map(Scalar::Text),
            "calculator_name" | "calculator" => self.calculator_name.clone().map(Scalar::Text),
            _ => None,
        }
    }
}
