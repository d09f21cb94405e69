//! Telemetry data model.
//!
//! This module contains the internal representation of spans, metric points and
//! log entries, and the `TelemetryRecord`/`Batch` envelope that carries them.

pub mod log;
pub mod metric;
pub mod record;
pub mod trace;

pub use log::{LogEntry, LogLevel};
pub use metric::{MetricKind, MetricPoint, Temporality};
pub use record::{
    AttributeValue, Attributes, Batch, InvalidRecord, SignalKind, TelemetryRecord,
    UnknownSignalKind,
};
pub use trace::{Span, SpanEvent, SpanKind, SpanStatus};
