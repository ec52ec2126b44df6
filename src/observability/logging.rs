//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global `tracing` subscriber
//! - Select JSON or pretty output
//! - Log the build banner at startup
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level when set
//! - Build metadata is an immutable value passed explicitly, not global state

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt as tracing_fmt, layer::SubscriberExt, EnvFilter};

/// Output format of the log sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable multi-line output.
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format '{other}' (expected json or pretty)")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Json => f.write_str("json"),
            LogFormat::Pretty => f.write_str("pretty"),
        }
    }
}

/// Build the subscriber: an env filter plus a formatter writing to `writer`.
pub fn subscriber<W>(
    level: &str,
    format: LogFormat,
    writer: W,
) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => Box::new(
            registry.with(
                tracing_fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_writer(writer),
            ),
        ),
        LogFormat::Pretty => {
            Box::new(registry.with(tracing_fmt::layer().pretty().with_writer(writer)))
        }
    }
}

/// Install the global subscriber writing to stdout.
pub fn init(level: &str, format: LogFormat) -> Result<(), TryInitError> {
    subscriber(level, format, std::io::stdout).try_init()
}

/// Version metadata stamped into the binary at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: &'static str,
    pub date: &'static str,
    pub commit: &'static str,
}

impl BuildInfo {
    /// Metadata of the running binary. Unset build variables read as `N/A`.
    pub const fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            date: match option_env!("BUILD_DATE") {
                Some(date) => date,
                None => "N/A",
            },
            commit: match option_env!("BUILD_COMMIT") {
                Some(commit) => commit,
                None => "N/A",
            },
        }
    }
}

pub fn log_startup_banner(build: &BuildInfo) {
    tracing::info!(
        build_version = build.version,
        build_date = build.date,
        build_commit = build.commit,
        "Application starting"
    );
}
