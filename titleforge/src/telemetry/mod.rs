//! Logging setup.
//!
//! Structured logging goes through `tracing`. The CLI calls
//! [`init`] once at startup; library code only emits events and never
//! installs a subscriber. Verbosity is controlled with the standard
//! `RUST_LOG` environment variable, defaulting to `info` for this
//! crate and `warn` for dependencies.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "warn,titleforge=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a stderr subscriber.
///
/// Stdout is left for command output; log lines go to stderr so they
/// interleave cleanly with progress bars.
pub fn init() {
    fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

/// Install a subscriber writing to a daily-rotated file in `dir`.
///
/// Returns the writer guard; dropping it flushes buffered log lines,
/// so the caller must keep it alive for the process lifetime.
pub fn init_with_file(dir: &Path) -> WorkerGuard {
    let appender = tracing_appender::rolling::daily(dir, "titleforge.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    fmt()
        .with_env_filter(env_filter())
        .with_writer(writer)
        .with_ansi(false)
        .init();
    guard
}
