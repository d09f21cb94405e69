//! Loki exporter.
//!
//! Groups log entries into streams by label set and POSTs them to the Loki push API.

use super::{build_client, send, ExportError};
use serde::Serialize;
use shared::config::{LineFormat, LokiSettings};
use shared::models::{Attributes, Batch, LogEntry, SignalKind};
use std::collections::BTreeMap;

/// Header carrying the tenant in multi-tenant Loki deployments.
pub const TENANT_HEADER: &str = "X-Scope-OrgID";

/// Body of a Loki push request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushRequest {
    /// One entry per distinct label set.
    pub streams: Vec<Stream>,
}

/// Log lines sharing a label set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stream {
    /// Stream labels.
    pub stream: BTreeMap<String, String>,
    /// `[<unix nanos as string>, <line>]` pairs sorted by timestamp.
    pub values: Vec<[String; 2]>,
}

#[derive(Serialize)]
struct JsonLine<'a> {
    body: &'a str,
    #[serde(skip_serializing_if = "no_attributes")]
    attributes: &'a Attributes,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    span_id: Option<&'a str>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn no_attributes(attributes: &&Attributes) -> bool {
    attributes.is_empty()
}

/// Sends log batches to Loki.
#[derive(Debug)]
pub struct LokiExporter {
    id: String,
    endpoint: String,
    labels: BTreeMap<String, String>,
    line_format: LineFormat,
    client: reqwest::Client,
}

impl LokiExporter {
    /// Creates a Loki exporter.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured header is invalid or the HTTP client cannot be built.
    pub fn new(id: impl Into<String>, settings: &LokiSettings) -> Result<Self, ExportError> {
        let mut headers = settings.headers.clone();
        if let Some(tenant) = &settings.tenant_id {
            headers.insert(TENANT_HEADER.to_string(), tenant.clone());
        }
        Ok(Self {
            id: id.into(),
            endpoint: settings.endpoint.clone(),
            labels: settings.labels.clone(),
            line_format: settings.line_format,
            client: build_client(&settings.common, &headers)?,
        })
    }

    fn stream_labels(&self, entry: &LogEntry) -> BTreeMap<String, String> {
        let mut labels = self.labels.clone();
        labels.insert("service_name".to_string(), entry.service.clone());
        labels.insert("level".to_string(), entry.level.to_string());
        labels
    }

    fn render_line(&self, entry: &LogEntry) -> Result<String, ExportError> {
        match self.line_format {
            LineFormat::Raw => Ok(entry.body.clone()),
            LineFormat::Json => serde_json::to_string(&JsonLine {
                body: &entry.body,
                attributes: &entry.attributes,
                trace_id: entry.trace_id.as_deref(),
                span_id: entry.span_id.as_deref(),
            })
            .map_err(|e| ExportError::Encode(e.to_string())),
        }
    }

    /// Builds the push request for a batch. Streams appear in first-seen order and
    /// the values of each stream are sorted by timestamp, since Loki rejects
    /// out-of-order entries within a stream. Entries with equal timestamps keep
    /// their batch order.
    ///
    /// # Errors
    ///
    /// Returns an error if a line cannot be rendered.
    pub fn push_request(&self, batch: &Batch) -> Result<PushRequest, ExportError> {
        let mut grouped: Vec<(BTreeMap<String, String>, Vec<(i64, String)>)> = Vec::new();
        let mut index: BTreeMap<BTreeMap<String, String>, usize> = BTreeMap::new();

        for entry in batch.logs() {
            let labels = self.stream_labels(entry);
            let nanos = entry.timestamp.timestamp_nanos_opt().unwrap_or_default();
            let value = (nanos, self.render_line(entry)?);

            if let Some(&i) = index.get(&labels) {
                grouped[i].1.push(value);
            } else {
                index.insert(labels.clone(), grouped.len());
                grouped.push((labels, vec![value]));
            }
        }

        let streams = grouped
            .into_iter()
            .map(|(stream, mut values)| {
                values.sort_by_key(|(nanos, _)| *nanos);
                Stream {
                    stream,
                    values: values
                        .into_iter()
                        .map(|(nanos, line)| [nanos.to_string(), line])
                        .collect(),
                }
            })
            .collect();
        Ok(PushRequest { streams })
    }

    /// POSTs the log entries of a batch.
    ///
    /// # Errors
    ///
    /// Returns an error for non-log batches, encoding failures, transport failures and
    /// non-2xx responses.
    pub async fn export(&self, kind: SignalKind, batch: &Batch) -> Result<(), ExportError> {
        if kind != SignalKind::Logs {
            return Err(ExportError::Unsupported {
                exporter: "loki",
                signal: kind,
            });
        }

        let request = self.push_request(batch)?;
        if request.streams.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_vec(&request).map_err(|e| ExportError::Encode(e.to_string()))?;

        tracing::debug!(exporter = %self.id, streams = request.streams.len(), "Pushing logs to Loki");
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shared::config::ExporterCommon;
    use shared::models::{LogLevel, TelemetryRecord};

    fn settings(line_format: LineFormat) -> LokiSettings {
        LokiSettings {
            endpoint: "http://127.0.0.1:9/loki/api/v1/push".to_string(),
            tenant_id: Some("team-a".to_string()),
            labels: BTreeMap::from([("env".to_string(), "test".to_string())]),
            line_format,
            headers: BTreeMap::new(),
            common: ExporterCommon::default(),
        }
    }

    fn entry(level: LogLevel, body: &str, service: &str) -> LogEntry {
        LogEntry::new(level, body, service)
            .with_timestamp(Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap())
    }

    #[test]
    fn test_groups_entries_into_streams() {
        let exporter = LokiExporter::new("loki", &settings(LineFormat::Raw)).unwrap();
        let batch: Batch = vec![
            TelemetryRecord::from(entry(LogLevel::Info, "one", "api")),
            entry(LogLevel::Error, "two", "api").into(),
            entry(LogLevel::Info, "three", "api").into(),
            entry(LogLevel::Info, "four", "worker").into(),
        ]
        .into_iter()
        .collect();

        let request = exporter.push_request(&batch).unwrap();
        assert_eq!(request.streams.len(), 3);

        let first = &request.streams[0];
        assert_eq!(first.stream["service_name"], "api");
        assert_eq!(first.stream["level"], "info");
        assert_eq!(first.stream["env"], "test");
        assert_eq!(first.values.len(), 2);
        assert_eq!(first.values[0][0], "1705312800000000000");
        assert_eq!(first.values[0][1], "one");
        assert_eq!(first.values[1][1], "three");

        assert_eq!(request.streams[1].stream["level"], "error");
        assert_eq!(request.streams[2].stream["service_name"], "worker");
    }

    #[test]
    fn test_stream_values_are_sorted_by_timestamp() {
        let exporter = LokiExporter::new("loki", &settings(LineFormat::Raw)).unwrap();
        let at = |secs| Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, secs).unwrap();
        let batch = Batch::new(vec![
            entry(LogLevel::Info, "late", "api").with_timestamp(at(9)).into(),
            entry(LogLevel::Info, "early", "api").with_timestamp(at(1)).into(),
            entry(LogLevel::Info, "tie-first", "api").with_timestamp(at(5)).into(),
            entry(LogLevel::Info, "tie-second", "api").with_timestamp(at(5)).into(),
        ]);

        let request = exporter.push_request(&batch).unwrap();
        let lines: Vec<&str> = request.streams[0]
            .values
            .iter()
            .map(|[_, line]| line.as_str())
            .collect();
        assert_eq!(lines, ["early", "tie-first", "tie-second", "late"]);
        assert_eq!(request.streams[0].values[0][0], "1705312801000000000");
    }

    #[test]
    fn test_json_line_format() {
        let exporter = LokiExporter::new("loki", &settings(LineFormat::Json)).unwrap();
        let log = entry(LogLevel::Warn, "slow query", "db")
            .with_attribute("duration_ms", 1200)
            .with_trace_id("0af7651916cd43dd8448eb211c80319c");
        let batch = Batch::new(vec![log.into()]);

        let request = exporter.push_request(&batch).unwrap();
        let line: serde_json::Value =
            serde_json::from_str(&request.streams[0].values[0][1]).unwrap();
        assert_eq!(line["body"], "slow query");
        assert_eq!(line["attributes"]["duration_ms"], 1200);
        assert_eq!(line["trace_id"], "0af7651916cd43dd8448eb211c80319c");
        assert!(line.get("span_id").is_none());
    }

    #[test]
    fn test_push_request_shape() {
        let exporter = LokiExporter::new("loki", &settings(LineFormat::Raw)).unwrap();
        let batch = Batch::new(vec![entry(LogLevel::Info, "hello", "api").into()]);

        let json = serde_json::to_value(exporter.push_request(&batch).unwrap()).unwrap();
        assert_eq!(json["streams"][0]["stream"]["service_name"], "api");
        assert_eq!(json["streams"][0]["values"][0][1], "hello");
    }

    #[tokio::test]
    async fn test_rejects_non_log_batches() {
        let exporter = LokiExporter::new("loki", &settings(LineFormat::Raw)).unwrap();
        let result = exporter.export(SignalKind::Metrics, &Batch::default()).await;
        assert!(matches!(result, Err(ExportError::Unsupported { .. })));
    }
}
