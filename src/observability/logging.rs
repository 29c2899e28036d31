//! Structured logging configuration.

pub use crate::config::LogFormat;
use crate::config::LoggingSettings;
use crate::{Error, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `signalgate=debug,warn`.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds logging configuration from settings.
    ///
    /// Precedence for the filter: `RUST_LOG`, then `verbose` (forces
    /// `debug`), then the configured level.
    #[must_use]
    pub fn from_settings(settings: &LoggingSettings, verbose: bool) -> Self {
        let filter = std::env::var("RUST_LOG")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| {
                if verbose {
                    "debug".to_string()
                } else {
                    settings.level.clone()
                }
            });

        Self {
            filter,
            format: settings.format,
            file: settings.file.clone(),
        }
    }

    /// Parses the filter directive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the directive does not parse.
    pub fn env_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(&self.filter)
            .map_err(|e| Error::InvalidInput(format!("invalid log filter '{}': {e}", self.filter)))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::from_settings(&LoggingSettings::default(), false)
    }
}
