//! Periodic and final flushing of table buffers to a [`BulkInserter`]

use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use statka_shutdown::ShutdownToken;
use tokio::{sync::Mutex, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{BulkInserter, InsertError, TableName, TableRegistry, encode_json_each_row};

/// What happened to one table during a flush pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The backing store accepted `rows` rows
    Flushed { rows: usize },
    /// Attempt number `attempt` failed; the rows are buffered again for the next pass
    Retrying { rows: usize, attempt: usize },
    /// The retry limit was reached and `rows` rows were discarded
    Dropped { rows: usize, attempts: usize },
}

/// Per table outcomes of one flush pass, ordered by table name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushSummary {
    tables: Vec<(TableName, FlushOutcome)>,
}

impl FlushSummary {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn outcome(&self, table: &str) -> Option<FlushOutcome> {
        self.tables
            .iter()
            .find(|(t, _)| t.as_str() == table)
            .map(|(_, o)| *o)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TableName, FlushOutcome)> {
        self.tables.iter().map(|(t, o)| (t, *o))
    }

    pub fn flushed_rows(&self) -> usize {
        self.tables
            .iter()
            .map(|(_, o)| match o {
                FlushOutcome::Flushed { rows } => *rows,
                _ => 0,
            })
            .sum()
    }

    pub fn dropped_rows(&self) -> usize {
        self.tables
            .iter()
            .map(|(_, o)| match o {
                FlushOutcome::Dropped { rows, .. } => *rows,
                _ => 0,
            })
            .sum()
    }
}

/// Drains the [`TableRegistry`] into a [`BulkInserter`], one batch per table.
#[derive(Debug)]
pub struct FlushEngine {
    registry: Arc<TableRegistry>,
    inserter: Arc<dyn BulkInserter>,
    retry_max: NonZeroUsize,
    /// Held for the duration of a pass so that at most one is in flight
    pass: Mutex<()>,
}

impl FlushEngine {
    pub fn new(
        registry: Arc<TableRegistry>,
        inserter: Arc<dyn BulkInserter>,
        retry_max: NonZeroUsize,
    ) -> Self {
        Self {
            registry,
            inserter,
            retry_max,
            pass: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<TableRegistry> {
        &self.registry
    }

    pub fn retry_max(&self) -> NonZeroUsize {
        self.retry_max
    }

    /// Attempt to flush every non-empty table.
    ///
    /// Buffers are emptied up front under the registry lock, so rows ingested while the inserts
    /// are running land in a fresh buffer and wait for the next pass. Every table is attempted
    /// even when an earlier one fails. A call made while another pass is running waits for it to
    /// finish first.
    pub async fn flush_all(&self) -> FlushSummary {
        let _pass = self.pass.lock().await;

        let pending = self.registry.take_pending();
        if pending.is_empty() {
            debug!("nothing to flush");
            return FlushSummary::default();
        }

        let mut summary = FlushSummary::default();
        for batch in pending {
            let table = batch.table;
            let result = match encode_json_each_row(&batch.rows) {
                Ok(payload) => self.inserter.insert_json_each_row(&table, payload).await,
                Err(e) => Err(InsertError::MalformedPayload(e.to_string())),
            };

            let outcome = match result {
                Ok(()) => {
                    let rows = self.registry.settle_success(&table, batch.rows);
                    info!(%table, rows, "flushed table");
                    FlushOutcome::Flushed { rows }
                }
                Err(error) => {
                    let outcome = self
                        .registry
                        .settle_failure(&table, batch.rows, self.retry_max);
                    if let FlushOutcome::Dropped { rows, attempts } = outcome {
                        error!(
                            %table,
                            %error,
                            rows,
                            attempts,
                            "retry limit reached, dropping rows"
                        );
                    } else {
                        warn!(
                            %table,
                            %error,
                            ?outcome,
                            retry_max = self.retry_max.get(),
                            "flush failed, rows kept for the next pass"
                        );
                    }
                    outcome
                }
            };
            summary.tables.push((table, outcome));
        }

        summary
    }
}

/// Spawn the periodic flush task.
///
/// The first pass runs one `interval` after startup. When `shutdown` fires, the task runs one
/// last pass, logs anything it could not deliver, and signals completion on the token.
pub fn background_flush(
    engine: Arc<FlushEngine>,
    interval: Duration,
    shutdown: ShutdownToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    engine.flush_all().await;
                }
                _ = shutdown.wait_for_shutdown() => {
                    info!("running final flush before shutdown");
                    let summary = engine.flush_all().await;
                    let remaining = engine.registry().total_buffered_rows();
                    if remaining > 0 {
                        warn!(
                            rows = remaining,
                            "rows left unflushed at shutdown"
                        );
                    }
                    info!(
                        flushed = summary.flushed_rows(),
                        dropped = summary.dropped_rows(),
                        "final flush complete"
                    );
                    shutdown.complete();
                    break;
                }
            }
        }
    })
}
