//! The in memory buffer of a single table

use crate::{Row, TableName};

/// Rows waiting to be flushed for one table, plus the number of consecutive failed flushes
#[derive(Debug)]
pub struct TableBuffer {
    name: TableName,
    rows: Vec<Row>,
    retry_count: usize,
}

impl TableBuffer {
    pub(crate) fn new(name: TableName) -> Self {
        Self {
            name,
            rows: vec![],
            retry_count: 0,
        }
    }

    pub fn name(&self) -> &TableName {
        &self.name
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn retry_count(&self) -> usize {
        self.retry_count
    }

    /// Append a row, returning the number of rows now buffered
    pub(crate) fn push(&mut self, row: Row) -> usize {
        self.rows.push(row);
        self.rows.len()
    }

    /// Take every buffered row, leaving the buffer empty
    pub(crate) fn take_rows(&mut self) -> Vec<Row> {
        std::mem::take(&mut self.rows)
    }

    /// Put `rows` back ahead of anything appended since they were taken
    pub(crate) fn restore_front(&mut self, mut rows: Vec<Row>) {
        rows.append(&mut self.rows);
        self.rows = rows;
    }

    /// Count a failed flush and return the number of consecutive failures
    pub(crate) fn record_failure(&mut self) -> usize {
        self.retry_count += 1;
        self.retry_count
    }

    pub(crate) fn reset_retries(&mut self) {
        self.retry_count = 0;
    }
}
