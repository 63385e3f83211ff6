//! Tracing setup for the supervisor process.
//!
//! Log lines are the user-visible progress report of a run: lifecycle
//! transitions at `info`, namespace fallback at `warn`, and log capture,
//! transport, and stream-closure failures at `error`. The captured pod logs
//! themselves are written as files by `io::pod_logs`, unaffected by
//! `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG` env var. Defaults to `info` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=batchjob=debug batchjob job.yaml
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
