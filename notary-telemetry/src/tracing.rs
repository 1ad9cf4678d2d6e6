use std::sync::Once;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

/// Filter applied when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "info";

static INIT_TEST_TRACING: Once = Once::new();

/// Errors raised while installing the global tracing subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to bridge `log` records into tracing: {0}")]
    LogTracer(#[from] tracing_log::log::SetLoggerError),

    #[error("failed to install the global tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

/// Flushes buffered log lines when dropped.
///
/// Must be held until the process is about to exit, otherwise lines written by the non-blocking
/// writer may be lost.
#[must_use = "dropping the flusher stops the background log writer"]
#[derive(Debug)]
pub struct LogFlusher {
    _guard: WorkerGuard,
}

/// Installs the global tracing subscriber for a binary.
///
/// Lines are written to stdout by a background writer thread. The filter is read from
/// `RUST_LOG` and defaults to `info`.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    LogTracer::init()?;

    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_target(true))
        .try_init()?;

    ::tracing::info!(app_name, "tracing initialized");

    Ok(LogFlusher { _guard: guard })
}

/// Installs a tracing subscriber that writes through the test harness.
///
/// Safe to call from every test, only the first call has an effect.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

        // Another harness may already have installed a subscriber, which is fine.
        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
