//! End-to-end pipeline tests: OTLP/HTTP in, sinks out.

use super::common::{eventually, post_json, start_collector, traces_json, Sink};
use axum::http::StatusCode;
use shared::models::SignalKind;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

fn zipkin_pipeline(url: &str, extra: &str) -> String {
    format!(
        r"
receivers:
  otlp: {{ protocols: {{ http: {{ endpoint: '127.0.0.1:0' }} }} }}
exporters:
  zipkin:
    endpoint: '{url}'
    retry_on_failure: {{ max_attempts: 5, initial_interval_ms: 10, max_interval_ms: 50 }}
    {extra}
service:
  pipelines:
    traces: {{ receivers: [otlp], exporters: [zipkin] }}
"
    )
}

fn span_names(body: &serde_json::Value) -> Vec<String> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|span| span["name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_spans_reach_zipkin_in_order() {
    let sink = Sink::accepting();
    let url = sink.start().await;
    let collector = start_collector(&zipkin_pipeline(&url, "")).await;
    let addr = collector.http_addr("otlp").unwrap();

    let (status, _) = post_json(
        addr,
        "/v1/traces",
        &traces_json("checkout", &["first", "second", "third"]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    eventually(|| !sink.bodies().is_empty()).await;
    collector.shutdown(Duration::from_secs(2)).await.unwrap();

    let bodies = sink.bodies();
    assert_eq!(bodies.len(), 1);
    assert_eq!(span_names(&bodies[0]), ["first", "second", "third"]);

    let span = &bodies[0][0];
    assert_eq!(span["traceId"], "5b8efff798038103d269b633813fc60c");
    assert_eq!(span["kind"], "SERVER");
    assert_eq!(span["duration"], 250_000);
    assert_eq!(span["localEndpoint"]["serviceName"], "checkout");
}

#[tokio::test]
async fn test_failing_sink_receives_batch_exactly_once() {
    let sink = Sink::failing_first(2);
    let url = sink.start().await;
    let collector = start_collector(&zipkin_pipeline(&url, "")).await;
    let addr = collector.http_addr("otlp").unwrap();

    post_json(addr, "/v1/traces", &traces_json("checkout", &["pay"])).await;

    eventually(|| !sink.bodies().is_empty()).await;
    let stats = collector.stats();
    collector.shutdown(Duration::from_secs(2)).await.unwrap();

    assert_eq!(sink.started.load(Ordering::SeqCst), 3);
    assert_eq!(sink.bodies().len(), 1);

    let zipkin = &stats.exporters["zipkin"][&SignalKind::Traces];
    assert_eq!(zipkin.retries, 2);
    assert_eq!(zipkin.sent_batches, 1);
    assert_eq!(zipkin.failed_batches, 0);
}

#[tokio::test]
async fn test_malformed_request_is_rejected_and_not_routed() {
    let sink = Sink::accepting();
    let url = sink.start().await;
    let collector = start_collector(&zipkin_pipeline(&url, "")).await;
    let addr = collector.http_addr("otlp").unwrap();

    let (status, json) = post_json(addr, "/v1/traces", r#"{"resourceSpans": 7}"#).await;

    assert!(status.is_client_error());
    assert_eq!(json["code"], 400);

    let stats = collector.stats();
    collector.shutdown(Duration::from_secs(1)).await.unwrap();

    assert!(sink.bodies().is_empty());
    assert_eq!(sink.started.load(Ordering::SeqCst), 0);
    assert_eq!(stats.signals[&SignalKind::Traces].malformed_requests, 1);
    assert_eq!(stats.signals[&SignalKind::Traces].received_records, 0);
}

#[tokio::test]
async fn test_full_queue_evicts_oldest_batch() {
    let sink = Sink::slow(Duration::from_millis(300));
    let url = sink.start().await;
    let collector =
        start_collector(&zipkin_pipeline(&url, "sending_queue: { queue_size: 1 }")).await;
    let addr = collector.http_addr("otlp").unwrap();

    post_json(addr, "/v1/traces", &traces_json("svc", &["in-flight"])).await;
    eventually(|| sink.started.load(Ordering::SeqCst) == 1).await;

    post_json(addr, "/v1/traces", &traces_json("svc", &["evicted"])).await;
    post_json(addr, "/v1/traces", &traces_json("svc", &["kept"])).await;

    let stats = collector.stats();
    let zipkin = &stats.exporters["zipkin"][&SignalKind::Traces];
    assert_eq!(zipkin.dropped_batches, 1);
    assert_eq!(zipkin.dropped_records, 1);

    collector.shutdown(Duration::from_secs(2)).await.unwrap();

    let names: Vec<Vec<String>> = sink.bodies().iter().map(span_names).collect();
    assert_eq!(names, [vec!["in-flight".to_string()], vec!["kept".to_string()]]);
}

#[tokio::test]
async fn test_shutdown_drains_queued_batches() {
    let sink = Sink::slow(Duration::from_millis(50));
    let url = sink.start().await;
    let collector = start_collector(&zipkin_pipeline(&url, "")).await;
    let addr = collector.http_addr("otlp").unwrap();

    for name in ["a", "b", "c"] {
        post_json(addr, "/v1/traces", &traces_json("svc", &[name])).await;
    }
    collector.shutdown(Duration::from_secs(5)).await.unwrap();

    assert_eq!(sink.bodies().len(), 3);
}

#[tokio::test]
async fn test_shutdown_grace_covers_receivers_and_exporters() {
    let sink = Sink::slow(Duration::from_secs(10));
    let url = sink.start().await;
    let collector =
        start_collector(&zipkin_pipeline(&url, "timeout_ms: 60000")).await;
    let addr = collector.http_addr("otlp").unwrap();

    post_json(addr, "/v1/traces", &traces_json("svc", &["stuck"])).await;
    eventually(|| sink.started.load(Ordering::SeqCst) == 1).await;

    // A request whose body never finishes keeps the receiver busy.
    let mut stalled = tokio::net::TcpStream::connect(addr).await.unwrap();
    stalled
        .write_all(
            b"POST /v1/traces HTTP/1.1\r\nhost: localhost\r\n\
              content-type: application/json\r\ncontent-length: 100\r\n\r\n{",
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let grace = Duration::from_millis(400);
    let started = Instant::now();
    let result = collector.shutdown(grace).await;
    let elapsed = started.elapsed();

    assert!(result.is_err());
    assert!(
        elapsed < grace + Duration::from_millis(300),
        "shutdown took {elapsed:?} with a {grace:?} grace period"
    );
    drop(stalled);
}

#[tokio::test]
async fn test_prometheus_scrape_shows_ingested_counter() {
    let collector = start_collector(
        r"
receivers:
  otlp: { protocols: { http: { endpoint: '127.0.0.1:0' } } }
exporters:
  prometheus: { endpoint: '127.0.0.1:0' }
service:
  pipelines:
    metrics: { receivers: [otlp], exporters: [prometheus] }
",
    )
    .await;
    let addr = collector.http_addr("otlp").unwrap();
    let scrape = collector.exporters().prometheus_addr("prometheus").unwrap();

    let body = r#"{"resourceMetrics": [{
        "resource": {"attributes": [{"key": "service.name", "value": {"stringValue": "api"}}]},
        "scopeMetrics": [{"metrics": [{
            "name": "requests_total",
            "sum": {
                "aggregationTemporality": 2,
                "isMonotonic": true,
                "dataPoints": [{"asInt": 42, "timeUnixNano": "1700000000000000000"}]
            }
        }]}]
    }]}"#;
    let (status, _) = post_json(addr, "/v1/metrics", body).await;
    assert_eq!(status, StatusCode::OK);

    eventually(|| {
        collector.stats().exporters["prometheus"][&SignalKind::Metrics].sent_batches == 1
    })
    .await;

    let text = reqwest::get(format!("http://{scrape}/metrics"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("# TYPE requests_total counter\n"));
    assert!(text.contains("requests_total{job=\"api\"} 42\n"));

    collector.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_logs_reach_loki_grouped_by_stream() {
    let sink = Sink::accepting();
    let url = sink.start().await;
    let collector = start_collector(&format!(
        r"
receivers:
  otlp: {{ protocols: {{ http: {{ endpoint: '127.0.0.1:0' }} }} }}
exporters:
  loki: {{ endpoint: '{url}', labels: {{ env: test }}, line_format: raw }}
service:
  pipelines:
    logs: {{ receivers: [otlp], exporters: [loki] }}
"
    ))
    .await;
    let addr = collector.http_addr("otlp").unwrap();

    let body = r#"{"resourceLogs": [{
        "resource": {"attributes": [{"key": "service.name", "value": {"stringValue": "billing"}}]},
        "scopeLogs": [{"logRecords": [
            {"timeUnixNano": "1700000000000000000", "severityNumber": 17, "body": {"stringValue": "card declined"}},
            {"timeUnixNano": "1700000000000000001", "severityNumber": 9, "body": {"stringValue": "retrying"}},
            {"timeUnixNano": "1700000000000000002", "severityNumber": 17, "body": {"stringValue": "gave up"}}
        ]}]
    }]}"#;
    post_json(addr, "/v1/logs", body).await;

    eventually(|| !sink.bodies().is_empty()).await;
    collector.shutdown(Duration::from_secs(1)).await.unwrap();

    let push = &sink.bodies()[0];
    let streams = push["streams"].as_array().unwrap();
    assert_eq!(streams.len(), 2);

    assert_eq!(streams[0]["stream"]["service_name"], "billing");
    assert_eq!(streams[0]["stream"]["level"], "error");
    assert_eq!(streams[0]["stream"]["env"], "test");
    assert_eq!(
        streams[0]["values"],
        serde_json::json!([
            ["1700000000000000000", "card declined"],
            ["1700000000000000002", "gave up"]
        ])
    );
    assert_eq!(streams[1]["stream"]["level"], "info");
}

#[tokio::test]
async fn test_one_failing_exporter_does_not_block_another() {
    let broken = Sink::failing_first(usize::MAX);
    let broken_url = broken.start().await;
    let collector = start_collector(&format!(
        r"
receivers:
  otlp: {{ protocols: {{ http: {{ endpoint: '127.0.0.1:0' }} }} }}
exporters:
  zipkin:
    endpoint: '{broken_url}'
    retry_on_failure: {{ max_attempts: 2, initial_interval_ms: 5, max_interval_ms: 5 }}
  debug: {{ retain: 10 }}
service:
  pipelines:
    traces: {{ receivers: [otlp], exporters: [zipkin, debug] }}
"
    ))
    .await;
    let addr = collector.http_addr("otlp").unwrap();

    post_json(addr, "/v1/traces", &traces_json("svc", &["fan-out"])).await;

    eventually(|| {
        collector.stats().exporters["zipkin"][&SignalKind::Traces].failed_batches == 1
            && collector.exporters().debug_records("debug").unwrap().len() == 1
    })
    .await;
    assert_eq!(broken.bodies().len(), 0);

    collector.shutdown(Duration::from_secs(1)).await.unwrap();
}
