use super::backend::{Backend, BackendHandle, RecordIter};
use super::codec;
use super::collective::{self, CollectiveStream, Communicator};
use super::duration;
use super::error::{DbError, Result};
use super::expression::Query;
use super::lock::with_lock;
use super::record::{Record, Scalar};
use crate::core::models::calculator::CalculatorRegistry;
use crate::core::models::structure::Structure;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::iter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Metadata stored alongside a structure by [`Database::write`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entry {
    keywords: BTreeSet<String>,
    key_value_pairs: BTreeMap<String, Scalar>,
    data: Map<String, Value>,
    timestamp: Option<f64>,
}

impl Entry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.insert(keyword.into());
        self
    }
    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }
    pub fn pair(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.key_value_pairs.insert(key.into(), value.into());
        self
    }
    pub fn data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
    /// Overrides the write time (years since 2000-01-01).
    pub fn timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// What a batch [`Database::update`] changed, summed over all records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCounts {
    /// Keywords that were not already present.
    pub keywords_added: usize,
    /// Growth in the number of key-value pairs; overwriting a key does not count.
    pub key_value_net_change: isize,
}

/// A structure database: a backend driven through locking and process-group coordination.
#[derive(Debug)]
pub struct Database<B: Backend = BackendHandle> {
    backend: B,
    lock_path: Option<PathBuf>,
    comm: Arc<dyn Communicator>,
    calculators: CalculatorRegistry,
    timestamp: Option<f64>,
}

impl<B: Backend> Database<B> {
    pub fn with_backend(backend: B, comm: Arc<dyn Communicator>) -> Self {
        Self {
            backend,
            lock_path: None,
            comm,
            calculators: CalculatorRegistry::new(),
            timestamp: None,
        }
    }

    /// Serializes writes and updates through an advisory lock on `path`.
    pub fn with_lock_path(mut self, path: Option<PathBuf>) -> Self {
        self.lock_path = path;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn lock_path(&self) -> Option<&Path> {
        self.lock_path.as_deref()
    }

    /// Calculators that [`get_structure`](Self::get_structure) can rebuild by name.
    pub fn calculators_mut(&mut self) -> &mut CalculatorRegistry {
        &mut self.calculators
    }

    /// The timestamp used by the most recent write.
    pub fn timestamp(&self) -> Option<f64> {
        self.timestamp
    }

    /// Stores `structure` with the metadata in `entry` and returns the new record's id.
    pub fn write(&mut self, structure: &Structure, entry: Entry) -> Result<u64> {
        let Self {
            backend,
            lock_path,
            comm,
            ..
        } = self;
        let Entry {
            keywords,
            key_value_pairs,
            data,
            timestamp,
        } = entry;

        let (id, timestamp) = collective::call(&**comm, || {
            with_lock(lock_path.as_deref(), || {
                let timestamp = timestamp.unwrap_or_else(duration::now);
                codec::check_key_value_pairs(&key_value_pairs)?;
                let mut record = codec::collect_data(structure, timestamp)?;
                record.keywords = keywords;
                record.key_value_pairs = key_value_pairs;
                record.data = data;
                let id = backend.raw_write(record)?;
                Ok((id, timestamp))
            })
        })?;

        self.timestamp = Some(timestamp);
        info!(id, natoms = structure.len(), "Wrote record.");
        Ok(id)
    }

    /// Lazily yields the records matching `query`.
    ///
    /// Malformed selections surface as the first item. Each call rescans the backend.
    pub fn select(&self, query: impl Into<Query>) -> CollectiveStream<'_, Record> {
        let query = query.into();
        collective::stream(self.comm.as_ref(), move || self.scan(query))
    }

    fn scan(&self, query: Query) -> RecordIter<'_> {
        let parsed = match query.parse() {
            Ok(parsed) => parsed,
            Err(e) => return Box::new(iter::once(Err(e))),
        };
        debug!(
            %query,
            keywords = ?parsed.keywords,
            comparisons = parsed.comparisons.len(),
            "Selecting records."
        );
        match self.backend.raw_select(
            &parsed.keywords,
            &parsed.comparisons,
            query.explain,
            query.verbosity,
        ) {
            Ok(records) => Box::new(records.filter(move |r| match r {
                Ok(record) => query.accepts(record),
                Err(_) => true,
            })),
            Err(e) => Box::new(iter::once(Err(e))),
        }
    }

    /// The single record matching `query`.
    pub fn get(&self, query: impl Into<Query>) -> Result<Record> {
        let query = query.into();
        let label = query.to_string();
        let mut records = self.select(query);
        let first = records
            .next()
            .transpose()?
            .ok_or_else(|| DbError::NotFound(label.clone()))?;
        match records.next().transpose()? {
            Some(_) => Err(DbError::AmbiguousSelection(label)),
            None => Ok(first),
        }
    }

    pub fn count(&self, query: impl Into<Query>) -> Result<usize> {
        self.select(query).try_fold(0, |n, r| r.map(|_| n + 1))
    }

    /// Adds keywords and key-value pairs to the records `ids`, keeping their ids, unique ids and
    /// timestamps.
    pub fn update<S: AsRef<str>>(
        &mut self,
        ids: &[u64],
        add_keywords: &[S],
        add_key_value_pairs: &BTreeMap<String, Scalar>,
    ) -> Result<UpdateCounts> {
        let Self {
            backend,
            lock_path,
            comm,
            ..
        } = self;

        let counts = collective::call(&**comm, || {
            codec::check_key_value_pairs(add_key_value_pairs)?;
            with_lock(lock_path.as_deref(), || {
                let mut counts = UpdateCounts::default();
                for &id in ids {
                    let mut record = backend.get_record(id)?;

                    let before = record.keywords.len();
                    record
                        .keywords
                        .extend(add_keywords.iter().map(|k| k.as_ref().to_string()));
                    counts.keywords_added += record.keywords.len() - before;

                    let before = record.key_value_pairs.len() as isize;
                    record.key_value_pairs.extend(
                        add_key_value_pairs
                            .iter()
                            .map(|(k, v)| (k.clone(), v.clone())),
                    );
                    counts.key_value_net_change += record.key_value_pairs.len() as isize - before;

                    backend.raw_write(record)?;
                }
                Ok(counts)
            })
        })?;

        info!(
            records = ids.len(),
            keywords_added = counts.keywords_added,
            key_value_net_change = counts.key_value_net_change,
            "Updated records."
        );
        Ok(counts)
    }

    /// Fetches the single record matching `query` as a [`Structure`].
    ///
    /// With `add_additional_information`, the unique id and any keywords, key-value pairs and
    /// data are copied into [`Structure::info`].
    pub fn get_structure(
        &self,
        query: impl Into<Query>,
        attach_calculator: bool,
        add_additional_information: bool,
    ) -> Result<Structure> {
        let record = self.get(query)?;
        let mut structure = codec::decode(&record, attach_calculator, &self.calculators)?;
        if add_additional_information {
            let info = &mut structure.info;
            info.clear();
            info.insert("unique_id".into(), Value::String(record.unique_id));
            if !record.keywords.is_empty() {
                info.insert("keywords".into(), serde_json::to_value(&record.keywords)?);
            }
            if !record.key_value_pairs.is_empty() {
                info.insert(
                    "key_value_pairs".into(),
                    serde_json::to_value(&record.key_value_pairs)?,
                );
            }
            if !record.data.is_empty() {
                info.insert("data".into(), Value::Object(record.data));
            }
        }
        Ok(structure)
    }
}
