//! Log entries.
//!
//! A `LogEntry` is the log record variant. Its level drives the Loki `level`
//! stream label, so it is always one of six fixed values.

use super::record::InvalidRecord;
use super::{AttributeValue, Attributes};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity, bucketed the way OTLP groups severity numbers.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Severity numbers 1-4.
    Trace,
    /// Severity numbers 5-8.
    Debug,
    /// Severity numbers 9-12, and the fallback when nothing is known.
    #[default]
    Info,
    /// Severity numbers 13-16.
    Warn,
    /// Severity numbers 17-20.
    Error,
    /// Severity numbers 21-24.
    Fatal,
}

impl LogLevel {
    /// Lowercase name, as used for the Loki `level` label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }

    /// Parses a free-form severity text such as `WARNING` or `err`.
    #[must_use]
    pub fn from_severity_text(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" | "information" | "notice" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" | "err" => Some(Self::Error),
            "fatal" | "critical" | "crit" | "emergency" | "alert" => Some(Self::Fatal),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One log event.
///
/// ```
/// use shared::models::{LogEntry, LogLevel};
///
/// let log = LogEntry::new(LogLevel::Warn, "disk 91% full", "node-agent")
///     .with_attribute("mount", "/var");
///
/// assert!(log.check().is_ok());
/// assert_eq!(log.level.to_string(), "warn");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Event time, or observed time when the sender left it unset.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    #[serde(default)]
    pub level: LogLevel,
    /// Body text. Structured OTLP bodies arrive here as JSON text.
    pub body: String,
    /// Reporting service.
    pub service: String,
    /// Record and `resource.`-prefixed resource attributes.
    #[serde(default)]
    pub attributes: Attributes,
    /// Correlated trace, as hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Correlated span, as hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
}

impl LogEntry {
    /// Creates an entry timestamped now.
    #[must_use]
    pub fn new(level: LogLevel, body: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            body: body.into(),
            service: service.into(),
            attributes: Attributes::new(),
            trace_id: None,
            span_id: None,
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the correlated trace id.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Sets the correlated span id.
    #[must_use]
    pub fn with_span_id(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }

    /// Checks that the entry carries a body.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidRecord::EmptyBody`] for an empty body.
    pub fn check(&self) -> Result<(), InvalidRecord> {
        if self.body.is_empty() {
            return Err(InvalidRecord::EmptyBody);
        }
        Ok(())
    }
}
