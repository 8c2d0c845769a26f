//! CLI config for buffering and flushing

use std::{num::NonZeroUsize, time::Duration};

fn parse_interval(s: &str) -> Result<Duration, String> {
    let interval = humantime::parse_duration(s).map_err(|e| e.to_string())?;
    if interval.is_zero() {
        return Err("interval must be greater than zero".to_string());
    }
    Ok(interval)
}

/// CLI config for the table buffers and the flush task
#[derive(Debug, Clone, Copy, clap::Parser)]
pub struct BufferConfig {
    /// How often buffered rows are flushed to ClickHouse. Also the longest a row waits in memory
    /// when ClickHouse is healthy.
    #[clap(
        long = "flush-interval",
        env = "STATKA_FLUSH_INTERVAL",
        default_value = "10s",
        value_parser = parse_interval
    )]
    pub flush_interval: Duration,

    /// Consecutive failed flushes of a table after which its buffered rows are dropped.
    #[clap(
        long = "retry-max",
        env = "STATKA_RETRY_MAX",
        default_value = "3",
        action
    )]
    pub retry_max: NonZeroUsize,
}
