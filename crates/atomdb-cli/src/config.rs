mod defaults;

use crate::cli::DatabaseArgs;
use crate::error::{CliError, Result};
use atomdb::db::{BackendType, ConnectOptions};
use defaults::DefaultsConfig;
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
struct PartialDatabaseConfig {
    #[serde(rename = "use-lock-file")]
    use_lock_file: Option<bool>,
    #[serde(rename = "create-indices")]
    create_indices: Option<bool>,
    backend: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
struct PartialQueryConfig {
    limit: Option<usize>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    database: PartialDatabaseConfig,
    #[serde(default)]
    query: PartialQueryConfig,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    /// Loads `path` when given; no file means every setting falls back to its default.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                debug!("Loading configuration from {:?}", path);
                Self::from_file(path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Merges the `[database]` table with the command-line flags; flags win.
    pub fn connect_options(&self, args: &DatabaseArgs) -> Result<ConnectOptions> {
        let defaults = DefaultsConfig::default();
        let file = &self.database;

        let backend_type = match (args.backend, &file.backend) {
            (Some(backend), _) => backend,
            (None, Some(name)) => name
                .parse::<BackendType>()
                .map_err(|e| CliError::Config(format!("[database] backend: {e}")))?,
            (None, None) => BackendType::Infer,
        };
        let use_lock_file =
            args.use_lock_file || file.use_lock_file.unwrap_or(defaults.use_lock_file);
        let create_indices =
            !args.no_indices && file.create_indices.unwrap_or(defaults.create_indices);

        Ok(ConnectOptions::builder()
            .backend_type(backend_type)
            .use_lock_file(use_lock_file)
            .create_indices(create_indices)
            .build())
    }

    /// The row limit for `query`: the flag, else `[query] limit`, else unlimited.
    pub fn query_limit(&self, flag: Option<usize>) -> Result<Option<usize>> {
        match flag.or(self.query.limit).or(DefaultsConfig::default().limit) {
            Some(0) => Err(CliError::Config("query limit must be at least 1".into())),
            limit => Ok(limit),
        }
    }
}
