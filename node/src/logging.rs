//! # Logging
//!
//! One global `tracing` subscriber for the node. Operators pick the shape
//! with `--log-format`: colored lines for a terminal, or JSON lines for a
//! log shipper. `RUST_LOG` narrows or widens what gets through.
//!
//! Everything goes to stderr. Stdout carries only the `init` and `version`
//! summaries.

use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset: our two crates and the HTTP
/// request spans at `info`.
pub const DEFAULT_FILTER: &str = "tanglecart_node=info,tanglecart=info,tower_http=info";

/// Shape of each log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Colored, with source locations.
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Installs the subscriber. Panics if one is already installed, so call it
/// once from `main`.
///
/// `fallback` is used only when `RUST_LOG` is absent or unparsable, e.g.
///
/// ```text
/// RUST_LOG=tanglecart=debug,tower_http=warn tanglecart-node run
/// ```
pub fn init_logging(fallback: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true),
            )
            .init(),
    }

    tracing::debug!(?format, "logging ready");
}
