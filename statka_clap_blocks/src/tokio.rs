//! Config for the tokio runtime that serves HTTP and runs the flush task.

use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Tokio runtime type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum TokioRuntimeType {
    /// Current-thread runtime.
    CurrentThread,

    /// Multi-thread runtime.
    #[default]
    MultiThread,
}

/// CLI config for the tokio IO runtime.
#[derive(Debug, Clone, Copy, clap::Parser)]
pub struct TokioIoConfig {
    /// Set the maximum number of IO runtime threads to use.
    ///
    /// Defaults to the number of logical cores on the system.
    #[clap(long = "num-threads", env = "STATKA_NUM_THREADS", action)]
    pub num_threads: Option<NonZeroUsize>,

    /// IO tokio runtime type.
    #[clap(
        long = "runtime-type",
        env = "STATKA_RUNTIME_TYPE",
        default_value_t = TokioRuntimeType::default(),
        value_enum,
        action
    )]
    pub runtime_type: TokioRuntimeType,

    /// Specifies the limit for additional threads spawned by the runtime's blocking pool.
    #[clap(
        long = "runtime-max-blocking-threads",
        env = "STATKA_RUNTIME_MAX_BLOCKING_THREADS",
        action
    )]
    pub max_blocking_threads: Option<NonZeroUsize>,

    /// Sets a custom timeout for a thread in the blocking pool.
    #[clap(
        long = "runtime-thread-keep-alive",
        env = "STATKA_RUNTIME_THREAD_KEEP_ALIVE",
        value_parser = humantime::parse_duration
    )]
    pub thread_keep_alive: Option<Duration>,
}

impl TokioIoConfig {
    /// Creates the tokio runtime builder.
    pub fn builder(&self) -> Result<::tokio::runtime::Builder, std::io::Error> {
        // NOTE: logging is not installed yet, use eprintln!() for diagnostics here

        let mut builder = match self.runtime_type {
            TokioRuntimeType::CurrentThread => ::tokio::runtime::Builder::new_current_thread(),
            TokioRuntimeType::MultiThread => {
                let mut builder = ::tokio::runtime::Builder::new_multi_thread();
                let num_threads = match self.num_threads {
                    None => std::thread::available_parallelism()?,
                    Some(n) => n,
                };
                builder.worker_threads(num_threads.get());
                builder
            }
        };

        builder.enable_time();
        builder.enable_io();

        let thread_counter = Arc::new(AtomicUsize::new(1));
        builder.thread_name_fn(move || {
            format!("statka-io-{}", thread_counter.fetch_add(1, Ordering::SeqCst))
        });

        if let Some(x) = self.max_blocking_threads {
            builder.max_blocking_threads(x.get());
        }

        if let Some(x) = self.thread_keep_alive {
            builder.thread_keep_alive(x);
        }

        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ::tokio::net::TcpListener;
    use clap::Parser;
    use futures::FutureExt;
    use std::{ffi::OsString, future::Future};

    #[test]
    fn test_defaults() {
        let config = TokioIoConfig::parse_from(std::iter::empty::<OsString>());
        assert_eq!(config.runtime_type, TokioRuntimeType::MultiThread);
        assert!(config.num_threads.is_none());
    }

    #[test]
    fn test_blocking_pool_flags() {
        let config = TokioIoConfig::parse_from([
            "statka",
            "--runtime-max-blocking-threads",
            "8",
            "--runtime-thread-keep-alive",
            "5s",
        ]);
        assert_eq!(config.max_blocking_threads.map(NonZeroUsize::get), Some(8));
        assert_eq!(config.thread_keep_alive, Some(Duration::from_secs(5)));
        assert!(config.builder().unwrap().build().is_ok());
    }

    #[test]
    fn test_thread_name() {
        assert_runtime_thread_property(
            TokioIoConfig::parse_from(std::iter::empty::<OsString>())
                .builder()
                .unwrap(),
            || {
                let thread = std::thread::current();
                let tname = thread.name().expect("thread is named");
                assert!(tname.starts_with("statka-io-"), "Invalid thread name: {tname}");
            },
        );
    }

    #[test]
    fn test_io() {
        for runtime_type in ["current-thread", "multi-thread"] {
            assert_runtime_thread_property_async(
                TokioIoConfig::parse_from(["statka", "--runtime-type", runtime_type])
                    .builder()
                    .unwrap(),
                || async move {
                    assert!(is_io_enabled().await);
                },
            );
        }
    }

    #[track_caller]
    fn assert_runtime_thread_property<F>(builder: ::tokio::runtime::Builder, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        assert_runtime_thread_property_async(builder, || async move { f() });
    }

    #[track_caller]
    fn assert_runtime_thread_property_async<F, Fut>(mut builder: ::tokio::runtime::Builder, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let rt = builder.build().unwrap();
        rt.block_on(async move {
            ::tokio::spawn(async move { f().await }).await.unwrap();
        });
    }

    async fn is_io_enabled() -> bool {
        // binding panics when the IO driver is off
        TcpListener::bind("127.0.0.1:0")
            .catch_unwind()
            .await
            .is_ok()
    }
}
