//! Process settings.
//!
//! Loaded from environment variables with defaults. The pipeline layout itself lives
//! in the YAML document these settings point at.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default location of the collector document.
pub const DEFAULT_CONFIG_PATH: &str = "config/collector.yaml";

/// Default time exporters get to drain their queues on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

/// Process settings.
///
/// Values can be set via environment variables:
/// - `TELEPIPE_CONFIG`: path of the YAML document (default: "config/collector.yaml")
/// - `TELEPIPE_SHUTDOWN_GRACE_SECS`: drain time on shutdown (default: 10)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Path of the collector document.
    pub config_path: PathBuf,
    /// Drain time on shutdown.
    pub shutdown_grace: Duration,
}

impl Settings {
    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `TELEPIPE_SHUTDOWN_GRACE_SECS` is not a number.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if `TELEPIPE_SHUTDOWN_GRACE_SECS` is not a number.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config_path = lookup("TELEPIPE_CONFIG")
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
            .into();

        let grace_secs = lookup("TELEPIPE_SHUTDOWN_GRACE_SECS")
            .map(|s| s.parse::<u64>())
            .transpose()
            .context("TELEPIPE_SHUTDOWN_GRACE_SECS must be a whole number of seconds")?
            .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS);

        Ok(Self {
            config_path,
            shutdown_grace: Duration::from_secs(grace_secs),
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_path: DEFAULT_CONFIG_PATH.into(),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        }
    }
}
