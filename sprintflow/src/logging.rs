//! Development-time tracing for the workflow engine.
//!
//! Tracing is diagnostics only: stderr, filtered by `RUST_LOG`, never
//! persisted. The product output of a run is its records under
//! `.sprintflow/runs/<run>/` plus the per-step agent logs next to them.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the stderr subscriber.
///
/// `RUST_LOG` wins when set. Otherwise only warnings are shown, or engine
/// progress at `info` when `verbose` is set:
///
/// ```bash
/// RUST_LOG=sprintflow=debug sprintflow run --run-id demo
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "warn,sprintflow=info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    // A second init (tests driving `main` helpers) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init();
}
