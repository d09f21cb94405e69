//! Telemetry record envelope.
//!
//! A `TelemetryRecord` is the internal representation every receiver decodes into
//! and every exporter consumes. Records travel through the pipeline in `Batch`es.

use super::{LogEntry, MetricPoint, Span};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

/// The three telemetry signal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    /// Distributed trace spans.
    Traces,
    /// Metric data points.
    Metrics,
    /// Log records.
    Logs,
}

impl SignalKind {
    /// All signal kinds, in routing order.
    pub const ALL: [SignalKind; 3] = [Self::Traces, Self::Metrics, Self::Logs];

    /// Returns the lowercase name used in configuration and URLs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Traces => "traces",
            Self::Metrics => "metrics",
            Self::Logs => "logs",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown signal kind.
#[derive(Debug, Error)]
#[error("Unknown signal kind: '{0}' (expected traces, metrics or logs)")]
pub struct UnknownSignalKind(pub String);

impl FromStr for SignalKind {
    type Err = UnknownSignalKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "traces" => Ok(Self::Traces),
            "metrics" => Ok(Self::Metrics),
            "logs" => Ok(Self::Logs),
            other => Err(UnknownSignalKind(other.to_string())),
        }
    }
}

/// Why a decoded record was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRecord {
    /// Trace id is not 32 hex characters.
    #[error("trace id '{0}' is not 32 hex characters")]
    TraceId(String),
    /// Span id is not 16 hex characters.
    #[error("span id '{0}' is not 16 hex characters")]
    SpanId(String),
    /// Parent span id is present but not 16 hex characters.
    #[error("parent span id '{0}' is not 16 hex characters")]
    ParentSpanId(String),
    /// Log record without a body.
    #[error("log record has no body")]
    EmptyBody,
    /// Metric point without a name.
    #[error("metric point has no name")]
    EmptyMetricName,
}

/// Returns the id back as the error if it is not `len` hex characters.
pub(crate) fn check_hex_id(id: &str, len: usize) -> Result<(), String> {
    if id.len() == len && id.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(id.to_string())
    }
}

/// A scalar or string attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i64),
    /// Floating point value.
    Double(f64),
    /// String value.
    String(String),
}

impl AttributeValue {
    /// Returns the string slice if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Double(d) => write!(f, "{d}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

/// Attribute map carried by every record. Ordered so that label sets render stably.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A single telemetry item of any signal kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "lowercase")]
pub enum TelemetryRecord {
    /// A trace span.
    Span(Span),
    /// A metric data point.
    Metric(MetricPoint),
    /// A log entry.
    Log(LogEntry),
}

impl TelemetryRecord {
    /// Returns the signal kind this record belongs to.
    #[must_use]
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::Span(_) => SignalKind::Traces,
            Self::Metric(_) => SignalKind::Metrics,
            Self::Log(_) => SignalKind::Logs,
        }
    }

    /// Returns the name of the service that produced the record.
    #[must_use]
    pub fn service(&self) -> &str {
        match self {
            Self::Span(s) => &s.service,
            Self::Metric(m) => &m.service,
            Self::Log(l) => &l.service,
        }
    }

    /// Returns the record timestamp. Spans report their start time.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Span(s) => s.start_time,
            Self::Metric(m) => m.timestamp,
            Self::Log(l) => l.timestamp,
        }
    }

    /// Checks the record is fit to export.
    ///
    /// # Errors
    ///
    /// Returns why the record is invalid.
    pub fn check(&self) -> Result<(), InvalidRecord> {
        match self {
            Self::Span(s) => s.check(),
            Self::Metric(m) => m.check(),
            Self::Log(l) => l.check(),
        }
    }

    /// Returns the record attributes.
    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        match self {
            Self::Span(s) => &s.attributes,
            Self::Metric(m) => &m.attributes,
            Self::Log(l) => &l.attributes,
        }
    }
}

impl From<Span> for TelemetryRecord {
    fn from(span: Span) -> Self {
        Self::Span(span)
    }
}

impl From<MetricPoint> for TelemetryRecord {
    fn from(point: MetricPoint) -> Self {
        Self::Metric(point)
    }
}

impl From<LogEntry> for TelemetryRecord {
    fn from(entry: LogEntry) -> Self {
        Self::Log(entry)
    }
}

/// An ordered group of records received together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Batch {
    /// Records in receipt order.
    pub records: Vec<TelemetryRecord>,

    /// Number of records dropped while decoding because they could not be converted.
    #[serde(default)]
    pub rejected: u64,
}

impl Batch {
    /// Creates a batch from records.
    #[must_use]
    pub fn new(records: Vec<TelemetryRecord>) -> Self {
        Self {
            records,
            rejected: 0,
        }
    }

    /// Number of records in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the batch carries no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Splits the batch into one batch per signal kind, keeping receipt order within each.
    ///
    /// Kinds without records are omitted.
    #[must_use]
    pub fn partition(self) -> Vec<(SignalKind, Batch)> {
        let mut by_kind: BTreeMap<SignalKind, Vec<TelemetryRecord>> = BTreeMap::new();
        for record in self.records {
            by_kind.entry(record.kind()).or_default().push(record);
        }
        by_kind
            .into_iter()
            .map(|(kind, records)| (kind, Batch::new(records)))
            .collect()
    }

    /// Iterates over the spans in the batch.
    pub fn spans(&self) -> impl Iterator<Item = &Span> {
        self.records.iter().filter_map(|r| match r {
            TelemetryRecord::Span(s) => Some(s),
            _ => None,
        })
    }

    /// Iterates over the metric points in the batch.
    pub fn metric_points(&self) -> impl Iterator<Item = &MetricPoint> {
        self.records.iter().filter_map(|r| match r {
            TelemetryRecord::Metric(m) => Some(m),
            _ => None,
        })
    }

    /// Iterates over the log entries in the batch.
    pub fn logs(&self) -> impl Iterator<Item = &LogEntry> {
        self.records.iter().filter_map(|r| match r {
            TelemetryRecord::Log(l) => Some(l),
            _ => None,
        })
    }
}

impl FromIterator<TelemetryRecord> for Batch {
    fn from_iter<I: IntoIterator<Item = TelemetryRecord>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
