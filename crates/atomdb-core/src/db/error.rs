use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Unsupported database type: {0}")]
    UnsupportedBackend(String),

    #[error("Invalid selection clause '{clause}': {reason}")]
    InvalidExpression { clause: String, reason: String },

    #[error("Malformed duration '{0}' (expected e.g. '3d', '2M' or '1y+12h')")]
    MalformedDuration(String),

    #[error("Cannot decode record: {0}")]
    Decode(String),

    #[error("Value cannot be stored: {0}")]
    InvalidValue(String),

    #[error("Unknown calculator '{0}'")]
    UnknownCalculator(String),

    #[error("No record matches selection: {0}")]
    NotFound(String),

    #[error("More than one record matches selection: {0}")]
    AmbiguousSelection(String),

    #[error("Failed to acquire lock '{path}': {reason}", path = path.display())]
    Lock { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Process group communication failed: {0}")]
    Communication(String),

    #[error("Backend failure on the coordinating process: {0}")]
    Backend(String),
}

/// The form of a [`DbError`] that crosses a process-group broadcast.
///
/// Domain errors keep their kind and fields; infrastructure errors (I/O, SQLite, ...) are not
/// serializable and arrive on the other ranks as [`DbError::Backend`] with the original message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum WireError {
    UnsupportedBackend(String),
    InvalidExpression { clause: String, reason: String },
    MalformedDuration(String),
    Decode(String),
    InvalidValue(String),
    UnknownCalculator(String),
    NotFound(String),
    AmbiguousSelection(String),
    Lock { path: PathBuf, reason: String },
    Backend(String),
}

impl From<&DbError> for WireError {
    fn from(err: &DbError) -> Self {
        match err {
            DbError::UnsupportedBackend(s) => WireError::UnsupportedBackend(s.clone()),
            DbError::InvalidExpression { clause, reason } => WireError::InvalidExpression {
                clause: clause.clone(),
                reason: reason.clone(),
            },
            DbError::MalformedDuration(s) => WireError::MalformedDuration(s.clone()),
            DbError::Decode(s) => WireError::Decode(s.clone()),
            DbError::InvalidValue(s) => WireError::InvalidValue(s.clone()),
            DbError::UnknownCalculator(s) => WireError::UnknownCalculator(s.clone()),
            DbError::NotFound(s) => WireError::NotFound(s.clone()),
            DbError::AmbiguousSelection(s) => WireError::AmbiguousSelection(s.clone()),
            DbError::Lock { path, reason } => WireError::Lock {
                path: path.clone(),
                reason: reason.clone(),
            },
            DbError::Backend(s) => WireError::Backend(s.clone()),
            other => WireError::Backend(other.to_string()),
        }
    }
}

impl From<WireError> for DbError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::UnsupportedBackend(s) => DbError::UnsupportedBackend(s),
            WireError::InvalidExpression { clause, reason } => {
                DbError::InvalidExpression { clause, reason }
            }
            WireError::MalformedDuration(s) => DbError::MalformedDuration(s),
            WireError::Decode(s) => DbError::Decode(s),
            WireError::InvalidValue(s) => DbError::InvalidValue(s),
            WireError::UnknownCalculator(s) => DbError::UnknownCalculator(s),
            WireError::NotFound(s) => DbError::NotFound(s),
            WireError::AmbiguousSelection(s) => DbError::AmbiguousSelection(s),
            WireError::Lock { path, reason } => DbError::Lock { path, reason },
            WireError::Backend(s) => DbError::Backend(s),
        }
    }
}
