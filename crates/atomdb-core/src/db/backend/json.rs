use super::matcher;
use super::{Backend, RecordIter};
use crate::db::error::{DbError, Result};
use crate::db::expression::Comparison;
use crate::db::record::Record;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A database kept in a single JSON document.
///
/// The whole document is read for every operation and rewritten on every write, through a
/// temporary file that is renamed over the original once it is fully on disk.
#[derive(Debug, Clone)]
pub struct JsonBackend {
    path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    #[serde(default = "first_id")]
    next_id: u64,
    #[serde(default)]
    records: BTreeMap<u64, Record>,
}

fn first_id() -> u64 {
    1
}

impl Default for Document {
    fn default() -> Self {
        Self {
            next_id: first_id(),
            records: BTreeMap::new(),
        }
    }
}

impl JsonBackend {
    /// Opens the document at `path`. The file is created by the first write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Document> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Document::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Document::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, document: &Document) -> Result<()> {
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, document)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Backend for JsonBackend {
    fn raw_write(&mut self, mut record: Record) -> Result<u64> {
        let mut document = self.load()?;
        let id = match record.id {
            Some(id) if document.records.contains_key(&id) => id,
            _ => {
                let id = document.next_id;
                document.next_id += 1;
                id
            }
        };
        record.id = None;
        document.records.insert(id, record);
        self.store(&document)?;
        debug!(id, path = %self.path.display(), "Stored record.");
        Ok(id)
    }

    fn raw_select<'a>(
        &'a self,
        keywords: &BTreeSet<String>,
        comparisons: &[Comparison],
        explain: bool,
        verbosity: u8,
    ) -> Result<RecordIter<'a>> {
        let document = self.load()?;
        if explain {
            info!(
                path = %self.path.display(),
                records = document.records.len(),
                keywords = keywords.len(),
                comparisons = comparisons.len(),
                "Plan: full scan of the JSON document."
            );
        }
        if verbosity >= 2 {
            for comparison in comparisons {
                debug!(%comparison, "Scan filter.");
            }
        }

        let keywords = keywords.clone();
        let comparisons = comparisons.to_vec();
        Ok(Box::new(
            document
                .records
                .into_iter()
                .map(|(id, mut record)| {
                    record.id = Some(id);
                    record
                })
                .filter(move |record| matcher::matches(record, &keywords, &comparisons))
                .map(Ok),
        ))
    }

    fn get_record(&self, id: u64) -> Result<Record> {
        let mut document = self.load()?;
        let mut record = document
            .records
            .remove(&id)
            .ok_or_else(|| DbError::NotFound(format!("id={id}")))?;
        record.id = Some(id);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::backend::testing;
    use crate::db::expression::{Selection, parse};
    use crate::db::record::Scalar;
    use tempfile::tempdir;

    fn populated(dir: &Path) -> JsonBackend {
        let mut backend = JsonBackend::open(dir.join("test.json"));
        for record in testing::fixture() {
            backend.raw_write(record).unwrap();
        }
        backend
    }

    fn ids(backend: &JsonBackend, selection: &str) -> Vec<u64> {
        let parsed = parse(&Selection::from(selection), &[], 25.0).unwrap();
        backend
            .raw_select(&parsed.keywords, &parsed.comparisons, false, 1)
            .unwrap()
            .map(|r| r.unwrap().id.unwrap())
            .collect()
    }

    #[test]
    fn missing_file_is_an_empty_database() {
        let dir = tempdir().unwrap();
        let backend = JsonBackend::open(dir.path().join("absent.json"));
        assert_eq!(ids(&backend, ""), Vec::<u64>::new());
        assert!(matches!(backend.get_record(1), Err(DbError::NotFound(_))));
        assert!(!backend.path().exists());
    }

    #[test]
    fn selection_cases_match_the_fixture() {
        let dir = tempdir().unwrap();
        let backend = populated(dir.path());
        for (selection, expected) in testing::CASES {
            assert_eq!(ids(&backend, selection), expected.to_vec(), "for '{selection}'");
        }
    }

    #[test]
    fn rewriting_an_existing_id_replaces_it_in_place() {
        let dir = tempdir().unwrap();
        let mut backend = populated(dir.path());

        let mut record = backend.get_record(2).unwrap();
        let unique_id = record.unique_id.clone();
        record.key_value_pairs.insert("T".into(), Scalar::Int(10));
        assert_eq!(backend.raw_write(record).unwrap(), 2);

        let reread = backend.get_record(2).unwrap();
        assert_eq!(reread.unique_id, unique_id);
        assert_eq!(reread.key_value_pairs["T"], Scalar::Int(10));
        assert_eq!(ids(&backend, ""), vec![1, 2, 3]);
    }

    #[test]
    fn records_round_trip_through_the_document() {
        let dir = tempdir().unwrap();
        let backend = populated(dir.path());
        let mut expected = testing::fixture().remove(0);
        let stored = backend.get_record(1).unwrap();
        expected.id = Some(1);
        expected.unique_id = stored.unique_id.clone();
        assert_eq!(stored, expected);
    }

    #[test]
    fn no_temporary_file_is_left_behind() {
        let dir = tempdir().unwrap();
        populated(dir.path());
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["test.json".to_string()]);
    }

    #[test]
    fn corrupt_documents_are_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let backend = JsonBackend::open(&path);
        assert!(matches!(backend.get_record(1), Err(DbError::Json(_))));
    }
}
