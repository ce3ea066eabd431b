//! Development-time tracing for debugging the chat loop.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Dev diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted, not part of pairloop product output.
//!
//! - **Step artifacts (`io/chat_store`)**: Product artifacts in
//!   `.pairloop/chat/<id>/step/`. Always written, unaffected by `RUST_LOG`.
//!
//! - **Console (`console`)**: Progress and unpack lines on stdout.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber for development logging.
///
/// Reads `RUST_LOG` env var. Defaults to `warn`, or `pairloop=debug` with
/// `--debug`. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=pairloop=debug pairloop chat task.md
/// ```
pub fn init(debug: bool) {
    let fallback = if debug { "pairloop=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
