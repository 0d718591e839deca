//! Tracing initialization shared by all three binaries (§10.2). The Manager
//! gets a layered subscriber that duplicates output to `manager.log`; the
//! Node Agent and Dashboard get the teacher's plain `fmt::init()` equivalent.
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Initialize stdout-only logging, honoring `RUST_LOG` (teacher's
/// `tracing_subscriber::fmt::init()` pattern).
pub fn init_stdout() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// Initialize the Manager's dual stdout + `manager.log` logging. Returns the
/// `tracing_appender` guard; it must be held for the process lifetime or
/// the non-blocking file writer stops flushing.
pub fn init_manager() -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::never(".", "manager.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer().with_filter(filter());
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(filter());

    tracing_subscriber::registry().with(stdout_layer).with(file_layer).init();

    guard
}
