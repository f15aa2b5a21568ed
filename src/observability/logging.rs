//! Structured logging configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Default filter when neither `RUST_LOG` nor a configured filter is set.
pub const DEFAULT_FILTER: &str = "snaprot=info,warn";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Returns the format name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

impl FromStr for LogFormat {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown log format '{other}' (expected pretty or json)"
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Event filter.
    pub filter: EnvFilter,
    /// Log file; stderr when unset.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds the logging configuration.
    ///
    /// `RUST_LOG` wins over `filter`; `verbose` raises the crate's level to
    /// `debug` when neither is set.
    #[must_use]
    pub fn new(
        format: LogFormat,
        filter: Option<&str>,
        file: Option<PathBuf>,
        verbose: bool,
    ) -> Self {
        let fallback = match filter {
            Some(filter) => filter.to_string(),
            None if verbose => "snaprot=debug,info".to_string(),
            None => DEFAULT_FILTER.to_string(),
        };
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&fallback))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        Self {
            format,
            filter,
            file,
        }
    }
}
