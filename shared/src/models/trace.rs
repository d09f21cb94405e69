//! Spans.
//!
//! A `Span` is the trace record variant. Ids are kept as lowercase hex so that
//! exporters can write them to the wire unchanged.

use super::record::{check_hex_id, InvalidRecord};
use super::{AttributeValue, Attributes};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Span status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    /// Not set by the instrumentation.
    #[default]
    Unset,
    /// Explicitly marked successful.
    Ok,
    /// Failed.
    Error,
}

impl SpanStatus {
    /// Lowercase name, as used in `otel.status_code` tags.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a span in a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    /// In-process work. Also used when the sender left the kind unspecified.
    #[default]
    Internal,
    /// Handling an incoming request.
    Server,
    /// Making an outgoing request.
    Client,
    /// Enqueueing a message.
    Producer,
    /// Processing a message.
    Consumer,
}

impl SpanKind {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Server => "server",
            Self::Client => "client",
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A timestamped annotation on a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    /// Event name.
    pub name: String,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Event attributes.
    #[serde(default)]
    pub attributes: Attributes,
}

/// One operation within a trace.
///
/// ```
/// use shared::models::{Span, SpanKind};
///
/// let span = Span::new(
///     "0102030405060708090a0b0c0d0e0f10",
///     "0102030405060708",
///     "HTTP GET /api/users",
///     "api-service",
/// )
/// .with_kind(SpanKind::Server)
/// .with_attribute("http.status_code", 200);
///
/// assert!(span.check().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    /// Trace id, 32 hex characters.
    pub trace_id: String,
    /// Span id, 16 hex characters.
    pub span_id: String,
    /// Parent span id; absent on root spans.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    /// Operation name.
    pub name: String,
    /// Reporting service.
    pub service: String,
    /// Span kind.
    #[serde(default)]
    pub kind: SpanKind,
    /// Status code.
    #[serde(default)]
    pub status: SpanStatus,
    /// Status description, usually only present on errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    /// Start of the operation.
    pub start_time: DateTime<Utc>,
    /// End of the operation.
    pub end_time: DateTime<Utc>,
    /// Span and `resource.`-prefixed resource attributes.
    #[serde(default)]
    pub attributes: Attributes,
    /// Events in recording order.
    #[serde(default)]
    pub events: Vec<SpanEvent>,
}

impl Span {
    /// Creates an internal span that starts and ends now.
    #[must_use]
    pub fn new(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        name: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_span_id: None,
            name: name.into(),
            service: service.into(),
            kind: SpanKind::Internal,
            status: SpanStatus::Unset,
            status_message: None,
            start_time: now,
            end_time: now,
            attributes: Attributes::new(),
            events: Vec::new(),
        }
    }

    /// Sets the parent span id.
    #[must_use]
    pub fn with_parent(mut self, parent_span_id: impl Into<String>) -> Self {
        self.parent_span_id = Some(parent_span_id.into());
        self
    }

    /// Sets the kind.
    #[must_use]
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the status code.
    #[must_use]
    pub fn with_status(mut self, status: SpanStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the start time.
    #[must_use]
    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    /// Sets the end time.
    #[must_use]
    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = end_time;
        self
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

    /// Appends an event without attributes.
    #[must_use]
    pub fn with_event(mut self, name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        self.events.push(SpanEvent {
            name: name.into(),
            timestamp,
            attributes: Attributes::new(),
        });
        self
    }

    /// End minus start. Negative if the sender's clocks disagree.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }

    /// Checks that the trace, span and parent ids are well-formed hex.
    ///
    /// # Errors
    ///
    /// Returns the first malformed id.
    pub fn check(&self) -> Result<(), InvalidRecord> {
        check_hex_id(&self.trace_id, 32).map_err(InvalidRecord::TraceId)?;
        check_hex_id(&self.span_id, 16).map_err(InvalidRecord::SpanId)?;
        if let Some(parent) = &self.parent_span_id {
            check_hex_id(parent, 16).map_err(InvalidRecord::ParentSpanId)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACE_ID: &str = "5b8efff798038103d269b633813fc60c";
    const SPAN_ID: &str = "eee19b7ec3c1b174";

    #[test]
    fn test_new_span_is_internal_and_unset() {
        let span = Span::new(TRACE_ID, SPAN_ID, "resolve", "dns");

        assert_eq!(span.kind, SpanKind::Internal);
        assert_eq!(span.status, SpanStatus::Unset);
        assert!(span.parent_span_id.is_none());
        assert_eq!(span.duration(), Duration::zero());
    }

    #[test]
    fn test_duration_spans_start_to_end() {
        let start = Utc::now();
        let span = Span::new(TRACE_ID, SPAN_ID, "query", "db")
            .with_start_time(start)
            .with_end_time(start + Duration::milliseconds(250));

        assert_eq!(span.duration().num_milliseconds(), 250);
    }

    #[test]
    fn test_check_accepts_well_formed_ids() {
        let span = Span::new(TRACE_ID, SPAN_ID, "query", "db").with_parent("0000000000000001");
        assert_eq!(span.check(), Ok(()));
    }

    #[test]
    fn test_check_rejects_short_trace_id() {
        let span = Span::new("5b8e", SPAN_ID, "query", "db");
        assert_eq!(span.check(), Err(InvalidRecord::TraceId("5b8e".to_string())));
    }

    #[test]
    fn test_check_rejects_non_hex_span_id() {
        let span = Span::new(TRACE_ID, "zz02030405060708", "query", "db");
        assert!(matches!(span.check(), Err(InvalidRecord::SpanId(_))));
    }

    #[test]
    fn test_check_rejects_bad_parent() {
        let span = Span::new(TRACE_ID, SPAN_ID, "query", "db").with_parent("01");
        assert!(matches!(span.check(), Err(InvalidRecord::ParentSpanId(_))));
    }

    #[test]
    fn test_kind_and_status_serialize_lowercase() {
        let span = Span::new(TRACE_ID, SPAN_ID, "GET /api", "api")
            .with_kind(SpanKind::Server)
            .with_status(SpanStatus::Error);

        let json = serde_json::to_value(&span).unwrap();

        assert_eq!(json["kind"], "server");
        assert_eq!(json["status"], "error");
        assert!(json.get("parent_span_id").is_none());
        assert_eq!(SpanStatus::Error.to_string(), "error");
        assert_eq!(SpanKind::Consumer.to_string(), "consumer");
    }
}
