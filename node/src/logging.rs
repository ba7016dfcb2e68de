//! # Structured Logging
//!
//! Initializes the `tracing` subscriber with configurable format (JSON or
//! pretty-printed) and environment-based filtering via `RUST_LOG`.
//!
//! All log output goes to stderr so stdout stays available for structured
//! data (key material from `init`, JSON piped out of the binary).

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored output for local development.
    Pretty,
    /// Machine-parseable JSON lines for log aggregation.
    Json,
}

impl LogFormat {
    /// Parses a format string. Accepts "json" or "pretty" (case-insensitive);
    /// anything unrecognized falls back to `Pretty`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Initializes the global tracing subscriber.
///
/// Call exactly once, early in `main()`. The `RUST_LOG` environment
/// variable overrides `default_level` when set, using the usual
/// `EnvFilter` directive syntax, e.g.
/// `RUST_LOG=quartz_node=debug,quartz_protocol=info`.
pub fn init_logging(default_level: &str, format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(true),
                )
                .init();
        }
    }

    tracing::info!("logging initialized (format={:?})", format);
}
