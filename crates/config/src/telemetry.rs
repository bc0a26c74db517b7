//! Process logging setup

use tracing_subscriber::{EnvFilter, filter::LevelFilter};

/// Installs the global tracing subscriber.
///
/// Defaults to `INFO`; override with the `RUST_LOG` environment variable.
pub fn register_logger() {
    let log_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();
}
