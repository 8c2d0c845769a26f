//! HTTP API service implementations for `server`

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use hyper::{
    Body, HeaderMap, Method, Request, Response, StatusCode,
    body::HttpBody,
    header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT},
    http::HeaderValue,
};
use serde::Serialize;
use statka_write::{InvalidTableName, Row, TableName, TableRegistry};
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

pub(crate) const UNKNOWN_VAL: &str = "unknown";

/// Longest request path written to the logs
const MAX_PATH_LENGTH_FOR_LOGGING: usize = 128;

#[derive(Debug, Error)]
pub enum Error {
    /// The request path is not a usable table name.
    #[error("invalid table name")]
    InvalidTableName(#[from] InvalidTableName),

    /// The `Content-Encoding` header is invalid and cannot be read.
    #[error("invalid content-encoding header: {0}")]
    NonUtf8ContentEncodingHeader(hyper::header::ToStrError),

    /// The specified `Content-Encoding` is not acceptable.
    #[error("unacceptable content-encoding: {0}")]
    InvalidContentEncoding(String),

    /// The client disconnected.
    #[error("client disconnected")]
    ClientHangup(#[source] hyper::Error),

    /// The client sent a request body that exceeds the configured maximum.
    #[error("max request size ({0} bytes) exceeded")]
    RequestSizeExceeded(usize),

    /// Decoding a gzip-compressed stream of data failed.
    #[error("error decoding gzip stream: {0}")]
    InvalidGzip(std::io::Error),

    /// A JSON body that is not an object of strings, numbers, booleans and objects.
    #[error("invalid JSON row: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// A query string or form body that cannot be decoded.
    #[error("invalid form data: {0}")]
    InvalidForm(#[from] serde_urlencoded::de::Error),

    #[error("failed to serialize response: {0}")]
    SerializeResponse(#[source] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Self::RequestSizeExceeded(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::SerializeResponse(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidTableName(_)
            | Self::NonUtf8ContentEncodingHeader(_)
            | Self::InvalidContentEncoding(_)
            | Self::ClientHangup(_)
            | Self::InvalidGzip(_)
            | Self::InvalidJson(_)
            | Self::InvalidForm(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Convert this error into an HTTP [`Response`]
    fn into_response(self) -> Response<Body> {
        text_response(self.status(), self.to_string())
    }
}

/// Body of a successful write
#[derive(Debug, Serialize)]
struct WriteResponse<'a> {
    ok: u8,
    table: &'a str,
    row_len: usize,
    total: usize,
}

/// Turns requests into rows and hands them to the [`TableRegistry`]
#[derive(Debug)]
pub struct HttpApi {
    registry: Arc<TableRegistry>,
    hostname: Arc<str>,
    max_request_bytes: usize,
}

impl HttpApi {
    pub fn new(registry: Arc<TableRegistry>, max_request_bytes: usize) -> Self {
        let hostname = sysinfo::System::host_name().unwrap_or_else(|| UNKNOWN_VAL.to_string());
        Self {
            registry,
            hostname: hostname.into(),
            max_request_bytes,
        }
    }

    /// Override the `server_hostname` stamped on every row
    pub fn with_hostname(self, hostname: impl Into<Arc<str>>) -> Self {
        Self {
            hostname: hostname.into(),
            ..self
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn write_row(&self, req: Request<Body>) -> Result<Response<Body>> {
        let table = TableName::sanitize(req.uri().path())?;
        let client_ip = extract_client_ip(&req).unwrap_or_else(|| UNKNOWN_VAL.to_string());
        let user_agent = req
            .headers()
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let mut row = match self.extract_row(req).await? {
            Some(row) if !row.is_empty() => row,
            _ => return Ok(text_response(StatusCode::NO_CONTENT, Body::empty())),
        };

        row.insert("event_time", Utc::now().timestamp_millis().to_string());
        row.insert("request_id", short_request_id());
        row.insert("server_hostname", self.hostname.as_ref());
        row.insert("client_ip", client_ip);
        row.insert("user_agent", user_agent);

        let row_len = row.len();
        let total = self.registry.ingest(&table, row);
        debug!(%table, row_len, total, "buffered row");

        json_response(&WriteResponse {
            ok: 1,
            table: table.as_str(),
            row_len,
            total,
        })
    }

    /// Build the row carried by `req`, or `None` for methods that carry no row
    ///
    /// GET maps query parameters to fields. POST decodes a JSON body as the row, otherwise takes
    /// form fields from the body followed by query parameters not already present. The first
    /// value of a repeated key wins.
    async fn extract_row(&self, req: Request<Body>) -> Result<Option<Row>> {
        match *req.method() {
            Method::GET => {
                let mut row = Row::new();
                add_form_fields(&mut row, req.uri().query().unwrap_or_default().as_bytes())?;
                Ok(Some(row))
            }
            Method::POST => {
                let json = json_content_type(req.headers());
                let form = !json && form_content_type(req.headers());
                let query = req.uri().query().map(str::to_string);

                let mut row = Row::new();
                if json {
                    let body = self.read_body(req).await?;
                    // an undecodable body is rejected rather than treated as an empty row
                    row = serde_json::from_slice(&body).map_err(Error::InvalidJson)?;
                } else if form {
                    let body = self.read_body(req).await?;
                    add_form_fields(&mut row, &body)?;
                }
                if !json {
                    add_form_fields(&mut row, query.unwrap_or_default().as_bytes())?;
                }
                Ok(Some(row))
            }
            _ => Ok(None),
        }
    }

    async fn read_body(&self, req: Request<Body>) -> Result<Bytes> {
        let encoding = req
            .headers()
            .get(&CONTENT_ENCODING)
            .map(|v| v.to_str().map_err(Error::NonUtf8ContentEncodingHeader))
            .transpose()?;
        let ungzip = match encoding {
            None | Some("identity") => false,
            Some("gzip") => true,
            Some(v) => return Err(Error::InvalidContentEncoding(v.to_string())),
        };

        // preallocate when the declared length looks reasonable
        let quarter_of_max = self.max_request_bytes / 4;
        let mut body = match req
            .headers()
            .get(&CONTENT_LENGTH)
            .and_then(|len| len.to_str().ok())
            .and_then(|len| len.parse().ok())
        {
            Some(len) if len < quarter_of_max => BytesMut::with_capacity(len),
            _ => BytesMut::new(),
        };

        let mut payload = req.into_body();
        while let Some(chunk) = payload.data().await {
            let chunk = chunk.map_err(Error::ClientHangup)?;
            if body.len() + chunk.len() > self.max_request_bytes {
                return Err(Error::RequestSizeExceeded(self.max_request_bytes));
            }
            body.extend_from_slice(&chunk);
        }
        let body = body.freeze();

        if !ungzip {
            return Ok(body);
        }

        use std::io::Read;
        let decoder = flate2::read::MultiGzDecoder::new(&body[..]);

        // read one byte past the limit to tell a body that fits from one that was cut off
        let mut decoder = decoder.take((self.max_request_bytes as u64).saturating_add(1));
        let mut decoded = Vec::new();
        decoder
            .read_to_end(&mut decoded)
            .map_err(Error::InvalidGzip)?;
        if decoded.len() > self.max_request_bytes {
            return Err(Error::RequestSizeExceeded(self.max_request_bytes));
        }

        Ok(decoded.into())
    }
}

/// Add every `key=value` pair of an urlencoded string whose key is not already in `row`
fn add_form_fields(row: &mut Row, encoded: &[u8]) -> Result<()> {
    for (key, value) in serde_urlencoded::from_bytes::<Vec<(String, String)>>(encoded)? {
        row.insert_if_absent(key, value);
    }
    Ok(())
}

fn short_request_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

fn json_content_type(headers: &HeaderMap) -> bool {
    let Some(mime) = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<mime::Mime>().ok())
    else {
        return false;
    };

    mime.type_() == mime::APPLICATION
        && (mime.subtype() == mime::JSON || mime.suffix() == Some(mime::JSON))
}

/// A missing content type counts as a form, the way browsers and curl send one
fn form_content_type(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers.get(CONTENT_TYPE) else {
        return true;
    };
    content_type
        .to_str()
        .ok()
        .and_then(|v| v.parse::<mime::Mime>().ok())
        .is_some_and(|m| m.essence_str() == mime::APPLICATION_WWW_FORM_URLENCODED.essence_str())
}

/// The caller's address: the first `X-Forwarded-For` entry, else `X-Real-IP`, else the peer
fn extract_client_ip<T>(req: &Request<T>) -> Option<String> {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            req.headers()
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .or_else(|| {
            req.extensions()
                .get::<SocketAddr>()
                .map(|addr| addr.ip().to_string())
        })
}

fn truncate_for_logging(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn text_response(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    if status != StatusCode::NO_CONTENT {
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
    }
    response
}

fn json_response<T: Serialize>(value: &T) -> Result<Response<Body>> {
    let body = serde_json::to_vec(value).map_err(Error::SerializeResponse)?;
    let mut response = Response::new(Body::from(body));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

pub(crate) async fn route_request(
    http_server: Arc<HttpApi>,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    // extract from the request for logging before it is consumed
    let method = req.method().clone();
    let uri = req.uri().clone();
    let client_ip = extract_client_ip(&req);

    let response = match (req.method(), uri.path()) {
        (&Method::GET, "/health") => Ok(text_response(StatusCode::OK, "OK")),
        _ => http_server.write_row(req).await,
    };

    Ok(match response {
        Ok(response) => {
            debug!(%method, path = %uri.path(), status = %response.status(), "processed request");
            response
        }
        Err(error) => {
            let path = truncate_for_logging(uri.path(), MAX_PATH_LENGTH_FOR_LOGGING);
            let ip = client_ip.as_deref().unwrap_or(UNKNOWN_VAL);
            if error.status().is_server_error() {
                error!(%error, %method, %path, client_ip = %ip, "Error while handling request");
            } else {
                debug!(%error, %method, %path, client_ip = %ip, "Rejected request");
            }
            error.into_response()
        }
    })
}
