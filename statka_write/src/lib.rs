//! This crate holds the buffering side of statka. Events arrive one row at a time and are
//! appended to an in-memory buffer keyed by their table name. On a fixed interval, and once more
//! at shutdown, the [`FlushEngine`] takes every non-empty buffer and bulk-inserts it into the
//! backing store as a single JSONEachRow batch per table.
//!
//! A failed batch is put back and retried on the next pass. After `retry_max` consecutive
//! failures for one table, that table's pending rows are dropped so that an unreachable store
//! cannot grow the buffers without bound.

pub mod flush;
pub mod insert;
pub mod registry;
pub mod row;
pub mod table_buffer;
pub mod table_name;

#[cfg(any(test, feature = "test_helpers"))]
pub mod test_utils;

pub use flush::{FlushEngine, FlushOutcome, FlushSummary, background_flush};
pub use insert::{BulkInserter, InsertError};
pub use registry::TableRegistry;
pub use row::{FieldValue, Row, encode_json_each_row};
pub use table_buffer::TableBuffer;
pub use table_name::{InvalidTableName, MAX_TABLE_NAME_LENGTH, TableName};
