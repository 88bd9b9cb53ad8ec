use super::backend::{BackendHandle, JsonBackend, NullBackend, SqliteBackend};
use super::collective::{Communicator, SerialCommunicator};
use super::database::Database;
use super::error::{DbError, Result};
use super::lock::lock_path_for;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// Decide from the database name.
    #[default]
    Infer,
    Null,
    Json,
    Sqlite,
    /// A remote PostgreSQL server; recognized, but not available in this build.
    Postgres,
}

impl BackendType {
    /// Infers the backend from a database name: no name, a `postgres://` URL, or the
    /// file extension (`.json`, `.db`).
    pub fn infer(name: Option<&str>) -> Result<Self> {
        let Some(name) = name else {
            return Ok(BackendType::Null);
        };
        if name.starts_with("postgres://") || name.starts_with("postgresql://") {
            return Ok(BackendType::Postgres);
        }
        match Path::new(name).extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(BackendType::Json),
            Some("db") => Ok(BackendType::Sqlite),
            _ => Err(DbError::UnsupportedBackend(name.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendType::Infer => "infer",
            BackendType::Null => "null",
            BackendType::Json => "json",
            BackendType::Sqlite => "db",
            BackendType::Postgres => "postgresql",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "infer" | "extract_from_name" => Ok(BackendType::Infer),
            "null" | "none" => Ok(BackendType::Null),
            "json" => Ok(BackendType::Json),
            "db" | "sqlite" => Ok(BackendType::Sqlite),
            "postgres" | "postgresql" => Ok(BackendType::Postgres),
            _ => Err(DbError::UnsupportedBackend(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub backend_type: BackendType,
    pub create_indices: bool,
    pub use_lock_file: bool,
    pub communicator: Arc<dyn Communicator>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            backend_type: BackendType::Infer,
            create_indices: true,
            use_lock_file: false,
            communicator: Arc::new(SerialCommunicator),
        }
    }
}

impl ConnectOptions {
    pub fn builder() -> ConnectOptionsBuilder {
        ConnectOptionsBuilder::new()
    }
}

#[derive(Debug, Default)]
pub struct ConnectOptionsBuilder {
    backend_type: Option<BackendType>,
    create_indices: Option<bool>,
    use_lock_file: Option<bool>,
    communicator: Option<Arc<dyn Communicator>>,
}

impl ConnectOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.backend_type = Some(backend_type);
        self
    }
    pub fn create_indices(mut self, create: bool) -> Self {
        self.create_indices = Some(create);
        self
    }
    pub fn use_lock_file(mut self, enabled: bool) -> Self {
        self.use_lock_file = Some(enabled);
        self
    }
    pub fn communicator(mut self, communicator: Arc<dyn Communicator>) -> Self {
        self.communicator = Some(communicator);
        self
    }

    pub fn build(self) -> ConnectOptions {
        let defaults = ConnectOptions::default();
        ConnectOptions {
            backend_type: self.backend_type.unwrap_or(defaults.backend_type),
            create_indices: self.create_indices.unwrap_or(defaults.create_indices),
            use_lock_file: self.use_lock_file.unwrap_or(defaults.use_lock_file),
            communicator: self.communicator.unwrap_or(defaults.communicator),
        }
    }
}

/// Opens the database `name` with the backend chosen by `options`.
///
/// Only the coordinating rank opens files; the other ranks of a group get an inert backend and
/// receive every result through the communicator.
pub fn connect(name: Option<&str>, options: ConnectOptions) -> Result<Database<BackendHandle>> {
    let backend_type = match options.backend_type {
        BackendType::Infer => BackendType::infer(name)?,
        explicit => explicit,
    };

    let coordinator = options.communicator.is_coordinator();
    let (backend, path) = match (backend_type, name) {
        (BackendType::Null, _) | (BackendType::Infer, _) => {
            (BackendHandle::Null(NullBackend), None)
        }
        (BackendType::Postgres, _) => {
            return Err(DbError::UnsupportedBackend(format!(
                "{} (PostgreSQL servers are not supported)",
                name.unwrap_or("postgresql")
            )));
        }
        (BackendType::Json | BackendType::Sqlite, None) => {
            return Err(DbError::UnsupportedBackend(format!(
                "{backend_type} backend needs a database name"
            )));
        }
        (_, Some(_)) if !coordinator => (BackendHandle::Null(NullBackend), name.map(Path::new)),
        (BackendType::Json, Some(name)) => {
            (BackendHandle::Json(JsonBackend::open(name)), Some(Path::new(name)))
        }
        (BackendType::Sqlite, Some(name)) => (
            BackendHandle::Sqlite(SqliteBackend::open(name, options.create_indices)?),
            Some(Path::new(name)),
        ),
    };

    let lock_path = match path {
        Some(path) if options.use_lock_file => Some(lock_path_for(path)),
        _ => None,
    };
    info!(
        backend = %backend_type,
        name = name.unwrap_or("<none>"),
        locked = lock_path.is_some(),
        rank = options.communicator.rank(),
        "Connected to database."
    );
    Ok(Database::with_backend(backend, options.communicator).with_lock_path(lock_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::backend::Backend;
    use tempfile::tempdir;

    #[test]
    fn names_map_to_backends() {
        assert_eq!(BackendType::infer(None).unwrap(), BackendType::Null);
        assert_eq!(BackendType::infer(Some("a/b.json")).unwrap(), BackendType::Json);
        assert_eq!(BackendType::infer(Some("x.db")).unwrap(), BackendType::Sqlite);
        assert_eq!(
            BackendType::infer(Some("postgresql://user@host/db")).unwrap(),
            BackendType::Postgres
        );
        assert_eq!(
            BackendType::infer(Some("postgres://host")).unwrap(),
            BackendType::Postgres
        );
        for bad in ["data.csv", "noextension", "x.json.bak"] {
            assert!(matches!(
                BackendType::infer(Some(bad)),
                Err(DbError::UnsupportedBackend(_))
            ));
        }
    }

    #[test]
    fn backend_types_parse_case_insensitively() {
        assert_eq!("JSON".parse::<BackendType>().unwrap(), BackendType::Json);
        assert_eq!("sqlite".parse::<BackendType>().unwrap(), BackendType::Sqlite);
        assert!("mongo".parse::<BackendType>().is_err());
    }

    #[test]
    fn builder_fills_in_defaults() {
        let options = ConnectOptions::builder().use_lock_file(true).build();
        assert!(options.use_lock_file);
        assert!(options.create_indices);
        assert_eq!(options.backend_type, BackendType::Infer);
        assert_eq!(options.communicator.size(), 1);
    }

    #[test]
    fn connect_builds_the_inferred_backend() {
        let dir = tempdir().unwrap();
        let json = dir.path().join("s.json");
        let db = connect(json.to_str(), ConnectOptions::default()).unwrap();
        assert!(matches!(db.backend(), BackendHandle::Json(_)));

        let sqlite = dir.path().join("s.db");
        let db = connect(sqlite.to_str(), ConnectOptions::default()).unwrap();
        assert!(matches!(db.backend(), BackendHandle::Sqlite(_)));
        assert!(sqlite.exists());

        let db = connect(None, ConnectOptions::default()).unwrap();
        assert!(matches!(db.backend(), BackendHandle::Null(_)));
        assert!(db.backend().get_record(1).is_err());
    }

    #[test]
    fn explicit_type_overrides_the_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("structures.data");
        let options = ConnectOptions::builder()
            .backend_type(BackendType::Json)
            .build();
        let db = connect(path.to_str(), options).unwrap();
        assert!(matches!(db.backend(), BackendHandle::Json(_)));
    }

    #[test]
    fn unsupported_targets_are_rejected() {
        assert!(matches!(
            connect(Some("postgresql://server/ase"), ConnectOptions::default()),
            Err(DbError::UnsupportedBackend(_))
        ));
        assert!(matches!(
            connect(Some("table.xlsx"), ConnectOptions::default()),
            Err(DbError::UnsupportedBackend(_))
        ));
        let options = ConnectOptions::builder()
            .backend_type(BackendType::Sqlite)
            .build();
        assert!(matches!(
            connect(None, options),
            Err(DbError::UnsupportedBackend(_))
        ));
    }

    #[test]
    fn lock_file_sits_next_to_the_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locked.json");
        let options = ConnectOptions::builder().use_lock_file(true).build();
        let db = connect(path.to_str(), options).unwrap();
        assert_eq!(db.lock_path(), Some(dir.path().join("locked.json.lock").as_path()));

        let db = connect(path.to_str(), ConnectOptions::default()).unwrap();
        assert_eq!(db.lock_path(), None);
    }
}
