//! Integration tests for the health and introspection endpoints.

use super::common::{get_json, start_collector};
use axum::http::StatusCode;
use std::time::Duration;

const CONFIG: &str = r"
receivers:
  otlp: { protocols: { http: { endpoint: '127.0.0.1:0' } } }
exporters:
  debug: {}
service:
  pipelines:
    logs: { receivers: [otlp], exporters: [debug] }
";

#[tokio::test]
async fn test_health_endpoint() {
    let collector = start_collector(CONFIG).await;
    let addr = collector.http_addr("otlp").unwrap();

    let (status, json) = get_json(addr, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "telepipe-collector");
    assert_eq!(json["receiver"], "otlp");

    collector.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_stats_endpoint_lists_every_destination() {
    let collector = start_collector(CONFIG).await;
    let addr = collector.http_addr("otlp").unwrap();

    let (status, json) = get_json(addr, "/internal/stats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["signals"]["logs"]["received_records"], 0);
    assert_eq!(json["exporters"]["debug"]["logs"]["queued_batches"], 0);
    assert!(json["exporters"]["debug"].get("traces").is_none());

    collector.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_listener_stops_on_shutdown() {
    let collector = start_collector(CONFIG).await;
    let addr = collector.http_addr("otlp").unwrap();

    collector.shutdown(Duration::from_secs(1)).await.unwrap();

    let result = reqwest::get(format!("http://{addr}/health")).await;
    assert!(result.is_err());
}
