//! The seam between the flush engine and the backing store

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::TableName;

#[derive(Debug, Error)]
pub enum InsertError {
    #[error("could not reach the backing store: {0}")]
    Connectivity(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("timed out waiting for the backing store")]
    Timeout,

    #[error("backing store rejected the batch as malformed: {0}")]
    MalformedPayload(String),

    #[error("backing store rejected the batch [{status}]: {message}")]
    Rejected { status: u16, message: String },
}

/// A store that can take a whole table batch in one call.
///
/// Implementations must treat a batch as all or nothing from the caller's point of view: an `Ok`
/// means every row in `payload` was accepted, any `Err` means the caller still owns all of them.
#[async_trait]
pub trait BulkInserter: Debug + Send + Sync + 'static {
    /// Insert `payload`, a JSONEachRow body (one JSON object per line), into `table`.
    async fn insert_json_each_row(&self, table: &TableName, payload: Bytes)
    -> Result<(), InsertError>;
}
