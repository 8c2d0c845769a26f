//! Manage application shutdown
//!
//! The ingest path and the flush path stop in a fixed order. The HTTP frontend stops accepting
//! rows first and drains the requests it already accepted. Only then are the backend tasks, i.e.,
//! the flush engine, told to run their last pass. Reversing that order would let a request land a
//! row in a table buffer after the final flush has already taken its snapshot.
//!
//! # Coordinate shutdown with the [`ShutdownManager`] type
//!
//! Backend components [`register`][ShutdownManager::register] to receive a [`ShutdownToken`].
//! They [`wait_for_shutdown`][ShutdownToken::wait_for_shutdown], do their cleanup, and signal back
//! via [`complete`][ShutdownToken::complete].
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::info;

/// Wait for a `SIGTERM` or `SIGINT` to stop the process on UNIX systems
#[cfg(unix)]
pub async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate()).expect("failed to register signal handler");
    let mut int = signal(SignalKind::interrupt()).expect("failed to register signal handler");

    tokio::select! {
        _ = term.recv() => info!("Received SIGTERM"),
        _ = int.recv() => info!("Received SIGINT"),
    }
}

/// Wait for a `ctrl+c` to stop the process on Windows systems
#[cfg(windows)]
pub async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received SIGINT");
}

/// Manage application shutdown
#[derive(Debug)]
pub struct ShutdownManager {
    frontend_shutdown: CancellationToken,
    backend_shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl ShutdownManager {
    /// Create a [`ShutdownManager`]
    ///
    /// The given [`CancellationToken`] is cancelled by [`shutdown`][Self::shutdown] and is what the
    /// HTTP server should use for its graceful shutdown.
    pub fn new(frontend_shutdown: CancellationToken) -> Self {
        Self {
            frontend_shutdown,
            backend_shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Create a [`ShutdownManager`] for testing purposes
    pub fn new_testing() -> Self {
        Self::new(CancellationToken::new())
    }

    /// Register a task that needs to perform work before the process may exit
    ///
    /// The caller must invoke [`complete`][ShutdownToken::complete] on the returned token, or
    /// [`join`][Self::join] will not return.
    pub fn register(&self) -> ShutdownToken {
        let (tx, rx) = oneshot::channel();
        self.tasks.spawn(rx);
        ShutdownToken::new(self.backend_shutdown.clone(), tx)
    }

    /// Stop the frontend from accepting new requests
    pub fn shutdown(&self) {
        self.frontend_shutdown.cancel();
    }

    /// Signal the backend to shut down and wait for every registered task to complete
    ///
    /// Call this after the frontend has drained, so that no row can be accepted once backend
    /// cleanup has started.
    pub async fn join(&self) {
        self.frontend_shutdown.cancel();
        self.backend_shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

/// A token that a backend component can obtain via [`register`][ShutdownManager::register]
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    backend: CancellationToken,
    complete_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl ShutdownToken {
    fn new(backend: CancellationToken, complete_tx: oneshot::Sender<()>) -> Self {
        Self {
            backend,
            complete_tx: Arc::new(Mutex::new(Some(complete_tx))),
        }
    }

    /// Future that completes when the backend is told to shut down
    pub async fn wait_for_shutdown(&self) {
        self.backend.cancelled().await;
    }

    /// Signal back to the [`ShutdownManager`] that cleanup is finished
    pub fn complete(&self) {
        if let Some(s) = self.complete_tx.lock().take() {
            let _ = s.send(());
        }
    }
}
