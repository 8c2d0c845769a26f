//! A small client for the ClickHouse HTTP interface, covering what statka needs: a liveness check
//! and JSONEachRow bulk inserts.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Body, IntoUrl, Method, StatusCode};
use secrecy::{ExposeSecret, Secret};
use statka_write::{BulkInserter, InsertError, TableName};
use tracing::debug;
use url::Url;

/// Primary error type for the [`Client`]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("base URL error: {0}")]
    BaseUrl(#[source] reqwest::Error),

    #[error("request URL error: {0}")]
    RequestUrl(#[from] url::ParseError),

    #[error("failed to build the HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("failed to read the response bytes: {0}")]
    Bytes(#[source] reqwest::Error),

    #[error("clickhouse responded with error [{code}]: {message}")]
    ApiError { code: StatusCode, message: String },

    #[error("failed to send {method} request for {query:?}: {source}")]
    RequestSend {
        method: Method,
        query: String,
        #[source]
        source: reqwest::Error,
    },
}

impl Error {
    fn request_send(method: Method, query: impl Into<String>, source: reqwest::Error) -> Self {
        Self::RequestSend {
            method,
            query: query.into(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for InsertError {
    fn from(e: Error) -> Self {
        match e {
            Error::RequestSend { source, .. } if source.is_timeout() => Self::Timeout,
            Error::ApiError { code, message } if code == StatusCode::BAD_REQUEST => {
                Self::MalformedPayload(message)
            }
            Error::ApiError { code, message } => Self::Rejected {
                status: code.as_u16(),
                message,
            },
            other => Self::Connectivity(Box::new(other)),
        }
    }
}

/// Client for the ClickHouse HTTP interface
#[derive(Debug, Clone)]
pub struct Client {
    /// The base URL of the ClickHouse HTTP interface, e.g. `http://localhost:8123`
    base_url: Url,
    /// Database that unqualified table names resolve in
    database: String,
    user: String,
    password: Secret<String>,
    /// A [`reqwest::Client`] for handling HTTP requests
    http_client: reqwest::Client,
}

impl Client {
    /// Create a new [`Client`] using the `default` database and user with no password
    pub fn new<U: IntoUrl>(base_url: U) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into_url().map_err(Error::BaseUrl)?,
            database: "default".to_string(),
            user: "default".to_string(),
            password: Secret::new(String::new()),
            http_client: reqwest::Client::new(),
        })
    }

    pub fn with_database<S: Into<String>>(mut self, database: S) -> Self {
        self.database = database.into();
        self
    }

    /// Set the user and password sent with each request
    pub fn with_credentials<U: Into<String>, P: Into<String>>(
        mut self,
        user: U,
        password: P,
    ) -> Self {
        self.user = user.into();
        self.password = Secret::new(password.into());
        self
    }

    /// Bound every request, connection included, by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Build)?;
        Ok(self)
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Check that the server is reachable and the credentials are accepted
    pub async fn ping(&self) -> Result<()> {
        self.execute("SELECT 1", Body::from(Bytes::new())).await?;
        Ok(())
    }

    /// Insert a JSONEachRow `payload` into `table`
    pub async fn insert_json_each_row(&self, table: &TableName, payload: Bytes) -> Result<()> {
        let query = format!("INSERT INTO {table} FORMAT JSONEachRow");
        self.execute(&query, Body::from(payload)).await?;
        Ok(())
    }

    /// POST `body` to the HTTP interface with `query` as the statement
    async fn execute(&self, query: &str, body: Body) -> Result<Bytes> {
        let url = self.base_url.join("/")?;
        debug!(%query, database = %self.database, "sending clickhouse request");
        let resp = self
            .http_client
            .post(url)
            .query(&[("query", query), ("database", self.database.as_str())])
            .header("X-ClickHouse-User", &self.user)
            .header("X-ClickHouse-Key", self.password.expose_secret())
            .body(body)
            .send()
            .await
            .map_err(|src| Error::request_send(Method::POST, query, src))?;
        let status = resp.status();
        let content = resp.bytes().await.map_err(Error::Bytes)?;

        match status {
            StatusCode::OK => Ok(content),
            code => Err(Error::ApiError {
                code,
                message: String::from_utf8_lossy(&content).trim_end().to_string(),
            }),
        }
    }
}

#[async_trait]
impl BulkInserter for Client {
    async fn insert_json_each_row(
        &self,
        table: &TableName,
        payload: Bytes,
    ) -> Result<(), InsertError> {
        Self::insert_json_each_row(self, table, payload)
            .await
            .map_err(Into::into)
    }
}
