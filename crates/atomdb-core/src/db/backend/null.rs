use super::{Backend, RecordIter};
use crate::db::error::{DbError, Result};
use crate::db::expression::Comparison;
use crate::db::record::Record;
use std::collections::BTreeSet;
use std::iter;
use tracing::trace;

/// A backend that stores nothing; used when no database name is given.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl Backend for NullBackend {
    fn raw_write(&mut self, record: Record) -> Result<u64> {
        trace!(unique_id = %record.unique_id, "Discarding record.");
        Ok(0)
    }

    fn raw_select<'a>(
        &'a self,
        _keywords: &BTreeSet<String>,
        _comparisons: &[Comparison],
        _explain: bool,
        _verbosity: u8,
    ) -> Result<RecordIter<'a>> {
        Ok(Box::new(iter::empty()))
    }

    fn get_record(&self, id: u64) -> Result<Record> {
        Err(DbError::NotFound(format!("id={id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::backend::testing;

    #[test]
    fn writes_are_accepted_and_forgotten() {
        let mut backend = NullBackend;
        for record in testing::fixture() {
            assert_eq!(backend.raw_write(record).unwrap(), 0);
        }
        let found = backend
            .raw_select(&BTreeSet::new(), &[], false, 1)
            .unwrap()
            .count();
        assert_eq!(found, 0);
        assert!(matches!(backend.get_record(0), Err(DbError::NotFound(_))));
    }
}
