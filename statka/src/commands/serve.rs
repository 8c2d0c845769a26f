//! Entrypoint for the statka server

use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use anyhow::Context;
use statka_clap_blocks::{
    buffer::BufferConfig, clickhouse::ClickHouseConfig, logging::LoggingConfig,
    socket_addr::BindAddr,
};
use statka_clickhouse::Client;
use statka_server::{HttpApi, serve};
use statka_shutdown::{ShutdownManager, wait_for_signal};
use statka_write::{BulkInserter, FlushEngine, TableRegistry, background_flush};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// The default bind address for the HTTP API.
pub const DEFAULT_HTTP_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, clap::Parser)]
pub struct Config {
    /// logging options
    #[clap(flatten)]
    pub(crate) logging_config: LoggingConfig,

    /// ClickHouse connection options
    #[clap(flatten)]
    clickhouse_config: ClickHouseConfig,

    /// buffering and flush options
    #[clap(flatten)]
    buffer_config: BufferConfig,

    /// The address on which statka will serve HTTP API requests
    #[clap(
        long = "http-bind",
        env = "STATKA_HTTP_BIND_ADDR",
        default_value = DEFAULT_HTTP_BIND_ADDR,
        action,
    )]
    http_bind_address: BindAddr,

    /// Maximum size of HTTP requests, after decompression.
    #[clap(
        long = "max-http-request-size",
        env = "STATKA_MAX_HTTP_REQUEST_SIZE",
        default_value = "10485760", // 10 MiB
        action,
    )]
    max_http_request_size: usize,

    /// How long open HTTP requests may take to finish at shutdown, and then how long the final
    /// flush may take.
    #[clap(
        long = "shutdown-grace-period",
        env = "STATKA_SHUTDOWN_GRACE_PERIOD",
        default_value = "30s",
        action
    )]
    shutdown_grace_period: humantime::Duration,
}

impl Config {
    fn run_settings(&self) -> RunSettings {
        RunSettings {
            flush_interval: self.buffer_config.flush_interval,
            retry_max: self.buffer_config.retry_max,
            max_http_request_size: self.max_http_request_size,
            shutdown_grace_period: self.shutdown_grace_period.into(),
        }
    }
}

/// Settings of [`run`] that do not concern the ClickHouse connection
#[derive(Debug, Clone, Copy)]
pub(crate) struct RunSettings {
    pub(crate) flush_interval: Duration,
    pub(crate) retry_max: NonZeroUsize,
    pub(crate) max_http_request_size: usize,
    /// Bounds the HTTP drain and, separately, the final flush
    pub(crate) shutdown_grace_period: Duration,
}

pub async fn command(config: Config) -> anyhow::Result<()> {
    let settings = config.run_settings();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        http_bind = %config.http_bind_address,
        clickhouse_url = %config.clickhouse_config.url,
        database = %config.clickhouse_config.database,
        flush_interval = %humantime::format_duration(settings.flush_interval),
        retry_max = settings.retry_max.get(),
        "statka server starting",
    );

    let client = connect(&config.clickhouse_config).await?;

    let listener = config
        .http_bind_address
        .bind()
        .and_then(TcpListener::from_std)
        .with_context(|| format!("failed to bind {}", config.http_bind_address))?;

    run(Arc::new(client), listener, settings, wait_for_signal()).await
}

/// Build the ClickHouse client and check that the server answers
async fn connect(config: &ClickHouseConfig) -> anyhow::Result<Client> {
    let client = config
        .make_client()
        .context("invalid ClickHouse configuration")?;
    client
        .ping()
        .await
        .with_context(|| format!("cannot reach ClickHouse at {}", config.url))?;
    info!("connected to ClickHouse");
    Ok(client)
}

/// Serve HTTP on `listener` and flush to `inserter` until `shutdown_signal` completes, then
/// drain the HTTP server and run the final flush.
pub(crate) async fn run<F>(
    inserter: Arc<dyn BulkInserter>,
    listener: TcpListener,
    settings: RunSettings,
    shutdown_signal: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send,
{
    let registry = Arc::new(TableRegistry::new());
    let engine = Arc::new(FlushEngine::new(
        Arc::clone(&registry),
        inserter,
        settings.retry_max,
    ));

    // Construct a token to trigger clean shutdown
    let frontend_shutdown = CancellationToken::new();
    let shutdown_manager = ShutdownManager::new(frontend_shutdown.clone());

    let flush_task = background_flush(
        Arc::clone(&engine),
        settings.flush_interval,
        shutdown_manager.register(),
    );

    let http = Arc::new(HttpApi::new(
        Arc::clone(&registry),
        settings.max_http_request_size,
    ));
    info!(hostname = http.hostname(), "HTTP API ready");

    let mut server = tokio::spawn(serve(http, listener, frontend_shutdown.clone()));

    let early_exit = tokio::select! {
        _ = shutdown_signal => None,
        res = &mut server => Some(res),
    };

    info!("shutting down, no longer accepting requests");
    shutdown_manager.shutdown();
    let grace_period = settings.shutdown_grace_period;
    let server_result = match early_exit {
        Some(res) => Some(res),
        None => match tokio::time::timeout(grace_period, &mut server).await {
            Ok(res) => Some(res),
            Err(_) => {
                warn!(
                    grace_period = %humantime::format_duration(grace_period),
                    "HTTP requests still open after the shutdown grace period, closing them"
                );
                server.abort();
                None
            }
        },
    };

    match tokio::time::timeout(grace_period, shutdown_manager.join()).await {
        Ok(()) => {
            if let Err(e) = flush_task.await {
                error!(error = %e, "flush task failed");
            }
        }
        Err(_) => warn!(
            grace_period = %humantime::format_duration(grace_period),
            remaining_rows = registry.total_buffered_rows(),
            "final flush did not finish within the shutdown grace period"
        ),
    }

    if let Some(res) = server_result {
        res.context("HTTP server task failed")?
            .context("HTTP server failed")?;
    }

    info!("statka stopped");
    Ok(())
}
