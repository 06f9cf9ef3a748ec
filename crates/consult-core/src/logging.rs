//! `tracing` subscriber setup.
//!
//! Log context (workflow id, connection id) travels on spans and structured
//! fields rather than in message text, so both the compact and the JSON
//! formatter carry it.

use tracing_subscriber::EnvFilter;

/// Output format for the global subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// `Json` when `json` is set, `Compact` otherwise.
    pub fn from_json_flag(json: bool) -> Self {
        if json { Self::Json } else { Self::Compact }
    }
}

/// Build the level filter. `RUST_LOG` wins over `level` when set.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global tracing subscriber writing to stderr.
///
/// Call once at startup. Later calls are no-ops, which keeps tests that
/// initialise logging independently from fighting over the global default.
pub fn init_subscriber(level: &str, format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr);

    let _ = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };
}
