//! Integration tests for the OTLP gRPC listener.
//!
//! These tests export through a real tonic client and check what reaches the
//! exporters.

use super::common::{get_json, start_collector};
use shared::models::{SignalKind, TelemetryRecord};
use shared::otlp::proto;
use shared::otlp::proto::collector::logs::v1::logs_service_client::LogsServiceClient;
use shared::otlp::proto::collector::trace::v1::trace_service_client::TraceServiceClient;
use std::time::Duration;

const CONFIG: &str = r"
receivers:
  otlp:
    protocols:
      grpc: { endpoint: '127.0.0.1:0' }
      http: { endpoint: '127.0.0.1:0' }
exporters:
  debug: { verbosity: detailed, retain: 10 }
service:
  pipelines:
    traces: { receivers: [otlp], exporters: [debug] }
    logs: { receivers: [otlp], exporters: [debug] }
";

fn string_value(value: &str) -> Option<proto::common::v1::AnyValue> {
    Some(proto::common::v1::AnyValue {
        value: Some(proto::common::v1::any_value::Value::StringValue(
            value.to_string(),
        )),
    })
}

fn service_resource(name: &str) -> Option<proto::resource::v1::Resource> {
    Some(proto::resource::v1::Resource {
        attributes: vec![proto::common::v1::KeyValue {
            key: "service.name".to_string(),
            value: string_value(name),
        }],
        ..Default::default()
    })
}

#[tokio::test]
async fn test_grpc_traces_reach_exporter() {
    let collector = start_collector(CONFIG).await;
    let grpc = collector.grpc_addr("otlp").unwrap();

    let mut client = TraceServiceClient::connect(format!("http://{grpc}"))
        .await
        .unwrap();

    let request = proto::collector::trace::v1::ExportTraceServiceRequest {
        resource_spans: vec![proto::trace::v1::ResourceSpans {
            resource: service_resource("grpc-test-service"),
            scope_spans: vec![proto::trace::v1::ScopeSpans {
                spans: vec![proto::trace::v1::Span {
                    trace_id: vec![0x11; 16],
                    span_id: vec![0x22; 8],
                    name: "GET /orders".to_string(),
                    kind: proto::trace::v1::span::SpanKind::Server as i32,
                    start_time_unix_nano: 1_700_000_000_000_000_000,
                    end_time_unix_nano: 1_700_000_000_020_000_000,
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }],
    };

    let response = client.export(request).await.unwrap().into_inner();
    assert!(response.partial_success.is_none());

    super::common::eventually(|| {
        collector.stats().exporters["debug"][&SignalKind::Traces].sent_records == 1
    })
    .await;

    let records = collector.exporters().debug_records("debug").unwrap();
    let TelemetryRecord::Span(span) = &records[0] else {
        panic!("expected a span");
    };
    assert_eq!(span.name, "GET /orders");
    assert_eq!(span.service, "grpc-test-service");
    assert_eq!(span.trace_id, "11".repeat(16));

    collector.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_grpc_logs_visible_through_debug_endpoint() {
    let collector = start_collector(CONFIG).await;
    let grpc = collector.grpc_addr("otlp").unwrap();
    let http = collector.http_addr("otlp").unwrap();

    let mut client = LogsServiceClient::connect(format!("http://{grpc}"))
        .await
        .unwrap();

    let request = proto::collector::logs::v1::ExportLogsServiceRequest {
        resource_logs: vec![proto::logs::v1::ResourceLogs {
            resource: service_resource("integration-test-service"),
            scope_logs: vec![proto::logs::v1::ScopeLogs {
                log_records: vec![
                    proto::logs::v1::LogRecord {
                        time_unix_nano: 1_700_000_000_000_000_000,
                        severity_number: 9,
                        body: string_value("gRPC integration log"),
                        ..Default::default()
                    },
                    proto::logs::v1::LogRecord {
                        time_unix_nano: 1_700_000_000_000_000_000,
                        severity_number: 9,
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        }],
    };

    let response = client.export(request).await.unwrap().into_inner();
    assert_eq!(response.partial_success.unwrap().rejected_log_records, 1);

    super::common::eventually(|| {
        collector.stats().exporters["debug"][&SignalKind::Logs].sent_records == 1
    })
    .await;

    let (_, json) = get_json(http, "/internal/debug/debug").await;
    let records = json["records"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["signal"], "log");
    assert_eq!(records[0]["body"], "gRPC integration log");
    assert_eq!(records[0]["service"], "integration-test-service");

    let stats = collector.stats();
    assert_eq!(stats.signals[&SignalKind::Logs].received_records, 1);
    assert_eq!(stats.signals[&SignalKind::Logs].rejected_records, 1);

    collector.shutdown(Duration::from_secs(1)).await.unwrap();
}
