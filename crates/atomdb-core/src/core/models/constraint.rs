use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

/// A geometric constraint attached to a structure.
///
/// Constraints are persisted as tagged descriptors (see [`ConstraintDescriptor`]),
/// so every variant must be reconstructible from its type tag and keyword arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Keeps the listed atoms fixed in all three Cartesian directions.
    FixAtoms { indices: Vec<usize> },
    /// Keeps one atom fixed along the directions where `mask` is `true`.
    FixCartesian { index: usize, mask: [bool; 3] },
}

/// The storage form of a constraint: a type tag plus its constructor arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintDescriptor {
    pub name: String,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConstraintError {
    #[error("Unknown constraint type '{0}'")]
    UnknownType(String),
    #[error("Invalid arguments for constraint '{name}': {message}")]
    InvalidArguments { name: String, message: String },
}

impl Constraint {
    pub fn type_name(&self) -> &'static str {
        match self {
            Constraint::FixAtoms { .. } => "FixAtoms",
            Constraint::FixCartesian { .. } => "FixCartesian",
        }
    }

    /// Returns `true` if the constraint references an atom index outside `0..natoms`.
    pub fn is_out_of_range(&self, natoms: usize) -> bool {
        match self {
            Constraint::FixAtoms { indices } => indices.iter().any(|&i| i >= natoms),
            Constraint::FixCartesian { index, .. } => *index >= natoms,
        }
    }

    pub fn to_descriptor(&self) -> ConstraintDescriptor {
        let kwargs = match self {
            Constraint::FixAtoms { indices } => json!({ "indices": indices }),
            Constraint::FixCartesian { index, mask } => json!({ "index": index, "mask": mask }),
        };
        ConstraintDescriptor {
            name: self.type_name().to_string(),
            kwargs: match kwargs {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }

    pub fn from_descriptor(descriptor: &ConstraintDescriptor) -> Result<Self, ConstraintError> {
        match descriptor.name.as_str() {
            "FixAtoms" => {
                let indices = required_arg(descriptor, "indices")?;
                Ok(Constraint::FixAtoms { indices })
            }
            "FixCartesian" => {
                let index = required_arg(descriptor, "index")?;
                let mask = required_arg(descriptor, "mask")?;
                Ok(Constraint::FixCartesian { index, mask })
            }
            other => Err(ConstraintError::UnknownType(other.to_string())),
        }
    }
}

fn required_arg<T: serde::de::DeserializeOwned>(
    descriptor: &ConstraintDescriptor,
    key: &str,
) -> Result<T, ConstraintError> {
    let value = descriptor
        .kwargs
        .get(key)
        .ok_or_else(|| ConstraintError::InvalidArguments {
            name: descriptor.name.clone(),
            message: format!("missing '{key}'"),
        })?;
    serde_json::from_value(value.clone()).map_err(|e| ConstraintError::InvalidArguments {
        name: descriptor.name.clone(),
        message: format!("'{key}': {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fix_atoms_descriptor_names_its_type() {
        let constraint = Constraint::FixAtoms {
            indices: vec![0, 2],
        };
        let descriptor = constraint.to_descriptor();
        assert_eq!(descriptor.name, "FixAtoms");
        assert_eq!(descriptor.kwargs["indices"], json!([0, 2]));
        assert_eq!(Constraint::from_descriptor(&descriptor), Ok(constraint));
    }

    #[test]
    fn fix_cartesian_survives_descriptor_conversion() {
        let constraint = Constraint::FixCartesian {
            index: 3,
            mask: [true, false, true],
        };
        let restored = Constraint::from_descriptor(&constraint.to_descriptor()).unwrap();
        assert_eq!(restored, constraint);
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        let descriptor = ConstraintDescriptor {
            name: "FixBondLength".to_string(),
            kwargs: Map::new(),
        };
        assert_eq!(
            Constraint::from_descriptor(&descriptor),
            Err(ConstraintError::UnknownType("FixBondLength".to_string()))
        );
    }

    #[test]
    fn missing_arguments_are_reported() {
        let descriptor = ConstraintDescriptor {
            name: "FixAtoms".to_string(),
            kwargs: Map::new(),
        };
        assert!(matches!(
            Constraint::from_descriptor(&descriptor),
            Err(ConstraintError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn out_of_range_indices_are_detected() {
        let constraint = Constraint::FixAtoms {
            indices: vec![0, 5],
        };
        assert!(constraint.is_out_of_range(5));
        assert!(!constraint.is_out_of_range(6));
    }
}
