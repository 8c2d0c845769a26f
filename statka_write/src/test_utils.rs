//! In-memory [`BulkInserter`]s for tests

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::{BulkInserter, InsertError, TableName};

/// Accepts every batch and keeps a copy of it
#[derive(Debug, Default)]
pub struct RecordingInserter {
    batches: Mutex<Vec<(TableName, Bytes)>>,
}

impl RecordingInserter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every batch received, in order
    pub fn batches(&self) -> Vec<(TableName, Bytes)> {
        self.batches.lock().clone()
    }

    /// The payloads received for `table`, decoded as UTF-8
    pub fn payloads_for(&self, table: &str) -> Vec<String> {
        self.batches
            .lock()
            .iter()
            .filter(|(t, _)| t.as_str() == table)
            .map(|(_, p)| String::from_utf8_lossy(p).into_owned())
            .collect()
    }

    /// Every line received for `table` across all batches
    pub fn lines_for(&self, table: &str) -> Vec<String> {
        self.payloads_for(table)
            .iter()
            .flat_map(|p| p.lines().map(str::to_string).collect::<Vec<_>>())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.batches.lock().len()
    }
}

#[async_trait]
impl BulkInserter for RecordingInserter {
    async fn insert_json_each_row(
        &self,
        table: &TableName,
        payload: Bytes,
    ) -> Result<(), InsertError> {
        self.batches.lock().push((table.clone(), payload));
        Ok(())
    }
}

/// Fails a set number of inserts, then behaves like a [`RecordingInserter`]
///
/// Use `usize::MAX` failures for a store that never recovers.
#[derive(Debug)]
pub struct FailingInserter {
    table: Option<String>,
    remaining_failures: Mutex<usize>,
    attempts: AtomicUsize,
    recorded: RecordingInserter,
}

impl FailingInserter {
    /// Fail the first `failures` inserts, whatever the table
    pub fn new(failures: usize) -> Self {
        Self {
            table: None,
            remaining_failures: Mutex::new(failures),
            attempts: AtomicUsize::new(0),
            recorded: RecordingInserter::new(),
        }
    }

    /// Fail the first `failures` inserts into `table` and accept everything else
    pub fn for_table(table: &str, failures: usize) -> Self {
        Self {
            table: Some(table.to_string()),
            ..Self::new(failures)
        }
    }

    /// Number of insert calls made, failed or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn recorded(&self) -> &RecordingInserter {
        &self.recorded
    }
}

#[async_trait]
impl BulkInserter for FailingInserter {
    async fn insert_json_each_row(
        &self,
        table: &TableName,
        payload: Bytes,
    ) -> Result<(), InsertError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let targeted = self.table.as_deref().is_none_or(|t| t == table.as_str());
        if targeted {
            let mut remaining = self.remaining_failures.lock();
            if *remaining > 0 {
                *remaining = remaining.saturating_sub(1);
                return Err(InsertError::Connectivity("connection refused".into()));
            }
        }
        self.recorded.insert_json_each_row(table, payload).await
    }
}
