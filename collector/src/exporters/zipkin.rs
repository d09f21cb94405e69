//! Zipkin exporter.
//!
//! Converts spans to the Zipkin v2 JSON model and POSTs them as one array per batch.

use super::{build_client, send, ExportError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::config::ZipkinSettings;
use shared::models::{Batch, SignalKind, Span, SpanKind, SpanStatus};
use std::collections::BTreeMap;

/// A span in Zipkin v2 format.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZipkinSpan {
    /// 32 hex characters.
    pub trace_id: String,
    /// 16 hex characters.
    pub id: String,
    /// Parent span id, absent for root spans.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Operation name.
    pub name: String,
    /// `CLIENT`, `SERVER`, `PRODUCER` or `CONSUMER`; absent for internal spans.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    /// Start time in microseconds since the epoch.
    pub timestamp: i64,
    /// Duration in microseconds.
    pub duration: i64,
    /// The service that recorded the span.
    pub local_endpoint: ZipkinEndpoint,
    /// Span events.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<ZipkinAnnotation>,
    /// Attributes and status, as strings.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// Zipkin endpoint (only the service name is populated).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZipkinEndpoint {
    /// Service name.
    pub service_name: String,
}

/// A timestamped span event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZipkinAnnotation {
    /// Event time in microseconds since the epoch.
    pub timestamp: i64,
    /// Event name.
    pub value: String,
}

fn micros(time: DateTime<Utc>) -> i64 {
    time.timestamp_micros()
}

fn zipkin_kind(kind: SpanKind) -> Option<&'static str> {
    match kind {
        SpanKind::Internal => None,
        SpanKind::Server => Some("SERVER"),
        SpanKind::Client => Some("CLIENT"),
        SpanKind::Producer => Some("PRODUCER"),
        SpanKind::Consumer => Some("CONSUMER"),
    }
}

impl From<&Span> for ZipkinSpan {
    fn from(span: &Span) -> Self {
        let mut tags: BTreeMap<String, String> = span
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect();

        match span.status {
            SpanStatus::Unset => {}
            SpanStatus::Ok => {
                tags.insert("otel.status_code".to_string(), "OK".to_string());
            }
            SpanStatus::Error => {
                tags.insert("otel.status_code".to_string(), "ERROR".to_string());
                tags.insert(
                    "error".to_string(),
                    span.status_message.clone().unwrap_or_default(),
                );
            }
        }

        Self {
            trace_id: span.trace_id.clone(),
            id: span.span_id.clone(),
            parent_id: span.parent_span_id.clone(),
            name: span.name.clone(),
            kind: zipkin_kind(span.kind),
            timestamp: micros(span.start_time),
            duration: (micros(span.end_time) - micros(span.start_time)).max(1),
            local_endpoint: ZipkinEndpoint {
                service_name: span.service.clone(),
            },
            annotations: span
                .events
                .iter()
                .map(|event| ZipkinAnnotation {
                    timestamp: micros(event.timestamp),
                    value: event.name.clone(),
                })
                .collect(),
            tags,
        }
    }
}

/// Sends span batches to a Zipkin collector.
#[derive(Debug)]
pub struct ZipkinExporter {
    id: String,
    endpoint: String,
    client: reqwest::Client,
}

impl ZipkinExporter {
    /// Creates a Zipkin exporter.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured header is invalid or the HTTP client cannot be built.
    pub fn new(id: impl Into<String>, settings: &ZipkinSettings) -> Result<Self, ExportError> {
        Ok(Self {
            id: id.into(),
            endpoint: settings.endpoint.clone(),
            client: build_client(&settings.common, &settings.headers)?,
        })
    }

    /// POSTs the spans of a batch, preserving their order.
    ///
    /// # Errors
    ///
    /// Returns an error for non-trace batches, encoding failures, transport failures and
    /// non-2xx responses.
    pub async fn export(&self, kind: SignalKind, batch: &Batch) -> Result<(), ExportError> {
        if kind != SignalKind::Traces {
            return Err(ExportError::Unsupported {
                exporter: "zipkin",
                signal: kind,
            });
        }

        let spans: Vec<ZipkinSpan> = batch.spans().map(ZipkinSpan::from).collect();
        if spans.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_vec(&spans).map_err(|e| ExportError::Encode(e.to_string()))?;

        tracing::debug!(exporter = %self.id, spans = spans.len(), "Sending spans to Zipkin");
        send(
            self.client
                .post(&self.endpoint)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body),
            &self.endpoint,
        )
        .await
    }
}
