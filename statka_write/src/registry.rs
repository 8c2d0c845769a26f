//! The table registry holds one [`TableBuffer`] per table name seen since startup.

use std::{collections::HashMap, num::NonZeroUsize};

use parking_lot::RwLock;

use crate::{FlushOutcome, Row, TableBuffer, TableName};

/// Rows taken out of a table's buffer for one flush attempt
#[derive(Debug)]
pub(crate) struct PendingBatch {
    pub(crate) table: TableName,
    pub(crate) rows: Vec<Row>,
}

/// Buffers keyed by table name, safe to share between request handlers and the flush task
///
/// Entries are created on first ingest and are never removed, so a table keeps its retry count
/// and anything ingested while a flush was in flight.
#[derive(Debug, Default)]
pub struct TableRegistry {
    tables: RwLock<HashMap<TableName, TableBuffer>>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `row` to the buffer for `table`, creating it if needed. Returns the number of rows
    /// now buffered for that table.
    pub fn ingest(&self, table: &TableName, row: Row) -> usize {
        let mut tables = self.tables.write();
        tables
            .entry(table.clone())
            .or_insert_with(|| TableBuffer::new(table.clone()))
            .push(row)
    }

    pub fn buffered_rows(&self, table: &str) -> Option<usize> {
        self.tables.read().get(table).map(TableBuffer::len)
    }

    pub fn retry_count(&self, table: &str) -> Option<usize> {
        self.tables.read().get(table).map(TableBuffer::retry_count)
    }

    /// A copy of the rows currently buffered for `table`
    pub fn snapshot_rows(&self, table: &str) -> Option<Vec<Row>> {
        self.tables.read().get(table).map(|b| b.rows().to_vec())
    }

    /// All known table names, sorted
    pub fn table_names(&self) -> Vec<TableName> {
        let mut names: Vec<_> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn total_buffered_rows(&self) -> usize {
        self.tables.read().values().map(TableBuffer::len).sum()
    }

    /// Empty every non-empty buffer in a single critical section and hand the rows to the caller.
    pub(crate) fn take_pending(&self) -> Vec<PendingBatch> {
        let mut tables = self.tables.write();
        let mut pending: Vec<_> = tables
            .values_mut()
            .filter(|b| !b.is_empty())
            .map(|b| PendingBatch {
                table: b.name().clone(),
                rows: b.take_rows(),
            })
            .collect();
        pending.sort_by(|a, b| a.table.cmp(&b.table));
        pending
    }

    /// Record that `rows` were accepted for `table`, returning how many there were.
    pub(crate) fn settle_success(&self, table: &TableName, rows: Vec<Row>) -> usize {
        let mut tables = self.tables.write();
        if let Some(buffer) = tables.get_mut(table) {
            buffer.reset_retries();
        }
        rows.len()
    }

    /// Record a failed attempt to flush `rows` for `table`.
    ///
    /// The rows go back in front of anything ingested since they were taken, unless this was
    /// attempt number `retry_max`, in which case they are discarded and the count starts over.
    pub(crate) fn settle_failure(
        &self,
        table: &TableName,
        rows: Vec<Row>,
        retry_max: NonZeroUsize,
    ) -> FlushOutcome {
        let mut tables = self.tables.write();
        let buffer = tables
            .entry(table.clone())
            .or_insert_with(|| TableBuffer::new(table.clone()));
        let count = rows.len();

        let attempt = buffer.record_failure();
        if attempt >= retry_max.get() {
            buffer.reset_retries();
            FlushOutcome::Dropped {
                rows: count,
                attempts: attempt,
            }
        } else {
            buffer.restore_front(rows);
            FlushOutcome::Retrying {
                rows: count,
                attempt,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table(name: &str) -> TableName {
        TableName::sanitize(name).unwrap()
    }

    #[test]
    fn ingest_creates_tables_on_demand() {
        let registry = TableRegistry::new();
        assert_eq!(registry.buffered_rows("events"), None);

        assert_eq!(registry.ingest(&table("events"), Row::from_iter([("a", "1")])), 1);
        assert_eq!(registry.ingest(&table("events"), Row::from_iter([("a", "2")])), 2);
        assert_eq!(registry.ingest(&table("clicks"), Row::from_iter([("a", "3")])), 1);

        assert_eq!(registry.buffered_rows("events"), Some(2));
        assert_eq!(registry.retry_count("events"), Some(0));
        assert_eq!(registry.table_names(), vec![table("clicks"), table("events")]);
        assert_eq!(registry.total_buffered_rows(), 3);
    }

    #[test]
    fn take_pending_skips_empty_buffers() {
        let registry = TableRegistry::new();
        registry.ingest(&table("a"), Row::from_iter([("x", "1")]));
        registry.ingest(&table("b"), Row::from_iter([("x", "2")]));

        let pending = registry.take_pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(registry.total_buffered_rows(), 0);

        assert!(registry.take_pending().is_empty());
        // the tables stay registered
        assert_eq!(registry.table_names().len(), 2);
    }

    #[test]
    fn settle_failure_then_drop() {
        let registry = TableRegistry::new();
        let t = table("t");
        let max = NonZeroUsize::new(2).unwrap();
        registry.ingest(&t, Row::from_iter([("x", "1")]));

        let batch = registry.take_pending().pop().unwrap();
        assert_eq!(
            registry.settle_failure(&t, batch.rows, max),
            FlushOutcome::Retrying {
                rows: 1,
                attempt: 1
            }
        );
        assert_eq!(registry.buffered_rows("t"), Some(1));
        assert_eq!(registry.retry_count("t"), Some(1));

        let batch = registry.take_pending().pop().unwrap();
        assert_eq!(
            registry.settle_failure(&t, batch.rows, max),
            FlushOutcome::Dropped {
                rows: 1,
                attempts: 2
            }
        );
        assert_eq!(registry.buffered_rows("t"), Some(0));
        assert_eq!(registry.retry_count("t"), Some(0));
    }
}
