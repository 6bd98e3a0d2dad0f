//! Tracing subscriber setup for the command-line front end.
//!
//! Library code emits through `log` and `tracing`; this installs a single
//! subscriber that receives both and writes to stderr.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(TelemetryError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Unknown log format '{0}' (expected 'text' or 'json')")]
    UnknownFormat(String),

    #[error("Failed to bridge log records: {0}")]
    LogBridge(#[from] log::SetLoggerError),

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Builds the env filter. `RUST_LOG` wins over the provided default directive.
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Installs the global subscriber and routes `log` records into it.
pub fn init_tracing(default_directive: &str, format: LogFormat) -> Result<(), TelemetryError> {
    let filter = env_filter(default_directive);

    match format {
        LogFormat::Text => {
            let subscriber = Registry::default()
                .with(filter)
                .with(fmt::layer().with_target(true).with_writer(std::io::stderr));
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Json => {
            let subscriber = Registry::default()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_writer(std::io::stderr),
                );
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    tracing_log::LogTracer::init()?;

    Ok(())
}
