//! HTTP front door of statka.
//!
//! Every request outside the reserved `/health` path writes one row into the table named by
//! its path. Rows land in a shared [`statka_write::TableRegistry`] and are flushed to ClickHouse
//! elsewhere.

pub mod http;

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use hyper::{
    Server,
    server::conn::{AddrIncoming, AddrStream},
    service::{make_service_fn, service_fn},
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use http::HttpApi;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to set up the listener: {0}")]
    Bind(#[source] hyper::Error),

    #[error("failed to read the listener address: {0}")]
    LocalAddr(#[source] std::io::Error),

    #[error("http server failed: {0}")]
    Serve(#[source] hyper::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Serve `http` on `listener` until `shutdown` is cancelled.
///
/// Cancelling stops accepting connections; the returned future completes once in-flight
/// requests are answered.
pub async fn serve(
    http: Arc<HttpApi>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr().map_err(Error::LocalAddr)?;
    let mut incoming = AddrIncoming::from_listener(listener).map_err(Error::Bind)?;
    incoming.set_nodelay(true);

    let make_service = make_service_fn(move |conn: &AddrStream| {
        let http = Arc::clone(&http);
        let remote_addr: SocketAddr = conn.remote_addr();
        async move {
            Ok::<_, Infallible>(service_fn(move |mut req| {
                req.extensions_mut().insert(remote_addr);
                http::route_request(Arc::clone(&http), req)
            }))
        }
    });

    info!(address = %addr, "listening for HTTP requests");

    Server::builder(incoming)
        .serve(make_service)
        .with_graceful_shutdown(shutdown.cancelled())
        .await
        .map_err(Error::Serve)?;

    info!("HTTP server stopped");
    Ok(())
}
