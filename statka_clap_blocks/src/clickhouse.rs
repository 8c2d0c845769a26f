//! CLI config for the ClickHouse connection

use std::convert::Infallible;

use secrecy::{ExposeSecret, Secret};
use statka_clickhouse::Client;
use url::Url;

fn parse_secret(s: &str) -> Result<Secret<String>, Infallible> {
    Ok(Secret::new(s.to_string()))
}

/// CLI config for the ClickHouse HTTP interface
#[derive(Debug, Clone, clap::Parser)]
pub struct ClickHouseConfig {
    /// Base URL of the ClickHouse HTTP interface.
    #[clap(
        long = "clickhouse-url",
        env = "STATKA_CLICKHOUSE_URL",
        default_value = "http://127.0.0.1:8123",
        action
    )]
    pub url: Url,

    /// Database the buffered tables live in.
    #[clap(
        long = "clickhouse-database",
        env = "STATKA_CLICKHOUSE_DATABASE",
        default_value = "default",
        action
    )]
    pub database: String,

    /// User to authenticate as.
    #[clap(
        long = "clickhouse-user",
        env = "STATKA_CLICKHOUSE_USER",
        default_value = "default",
        action
    )]
    pub user: String,

    /// Password for `--clickhouse-user`.
    #[clap(
        long = "clickhouse-password",
        env = "STATKA_CLICKHOUSE_PASSWORD",
        default_value = "",
        hide_env_values = true,
        hide_default_value = true,
        value_parser = parse_secret
    )]
    pub password: Secret<String>,

    /// Timeout for each request to ClickHouse, connecting included.
    #[clap(
        long = "clickhouse-timeout",
        env = "STATKA_CLICKHOUSE_TIMEOUT",
        default_value = "30s",
        action
    )]
    pub timeout: humantime::Duration,
}

impl ClickHouseConfig {
    /// Build a [`Client`] from this config
    pub fn make_client(&self) -> Result<Client, statka_clickhouse::Error> {
        Client::new(self.url.clone())?
            .with_database(&self.database)
            .with_credentials(&self.user, self.password.expose_secret())
            .with_timeout(*self.timeout)
    }
}
