//! Tracing subscriber bootstrap
//!
//! Libraries in this workspace only emit `tracing` events; binaries and test
//! harnesses call [`init_tracing`] once to decide where they go.
//!
//! ## Filtering
//!
//! The filter comes from `RUST_LOG` and defaults to `info`, e.g.
//! `RUST_LOG=waypoint_core=debug` shows every transport attempt.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as fmt_layer, EnvFilter};

const DEFAULT_FILTER: &str = "info";

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line human readable output
    #[default]
    Compact,
    /// One JSON object per event, for log shippers
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compact => f.write_str("compact"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" | "text" | "pretty" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unsupported log format: {other}")),
        }
    }
}

/// Install the global subscriber
///
/// Returns `false` when a global subscriber was already installed; that is
/// not an error, so tests may call this freely.
pub fn init_tracing(format: LogFormat) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Compact => {
            registry.with(fmt_layer::layer().compact().with_target(true)).try_init().is_ok()
        }
        LogFormat::Json => registry
            .with(fmt_layer::layer().json().with_current_span(true).with_span_list(false))
            .try_init()
            .is_ok(),
    };

    if installed {
        tracing::debug!(%format, "tracing subscriber installed");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_second_init_is_not_an_error() {
        init_tracing(LogFormat::Compact);
        assert!(!init_tracing(LogFormat::Json));
    }
}
