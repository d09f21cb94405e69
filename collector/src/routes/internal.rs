//! Introspection endpoints.
//!
//! - `GET /internal/stats` - ingestion and delivery counters
//! - `GET /internal/debug/{exporter}` - records retained by a debug exporter

use crate::metrics::StatsSnapshot;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use shared::models::TelemetryRecord;

/// Response body of `GET /internal/debug/{exporter}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RetainedRecords {
    /// Exporter id.
    pub exporter: String,
    /// Retained records, oldest first.
    pub records: Vec<TelemetryRecord>,
}

/// Error body for introspection endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

/// Creates the introspection routes.
pub fn internal_routes(state: AppState) -> Router {
    Router::new()
        .route("/internal/stats", get(stats))
        .route("/internal/debug/{exporter}", get(debug_records))
        .with_state(state)
}

async fn stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.stats_snapshot())
}

async fn debug_records(
    State(state): State<AppState>,
    Path(exporter): Path<String>,
) -> Result<Json<RetainedRecords>, (StatusCode, Json<ErrorResponse>)> {
    let records = state.exporters().debug_records(&exporter).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("No running debug exporter with id '{exporter}'"),
            }),
        )
    })?;
    Ok(Json(RetainedRecords { exporter, records }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::Protocol;
    use crate::state::test_support::state_from_yaml;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use shared::models::SignalKind;
    use std::time::Duration;
    use tower::ServiceExt;

    const CONFIG: &str = r"
receivers: { otlp: { protocols: { http: { endpoint: '127.0.0.1:0' } } } }
exporters: { debug: { retain: 5 } }
service: { pipelines: { logs: { receivers: [otlp], exporters: [debug] } } }
";

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_stats_reports_counters() {
        let state = state_from_yaml(CONFIG).await;
        state
            .receiver()
            .ingest(SignalKind::Logs, b"not json", Protocol::HttpJson)
            .unwrap_err();

        let (status, json) = get_json(internal_routes(state.clone()), "/internal/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["signals"]["logs"]["malformed_requests"], 1);
        assert_eq!(json["exporters"]["debug"]["logs"]["dropped_batches"], 0);

        state
            .exporters()
            .shutdown(Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_debug_records() {
        let state = state_from_yaml(CONFIG).await;
        let body = br#"{"resourceLogs": [{"scopeLogs": [{"logRecords": [
            {"timeUnixNano": "1700000000000000000", "body": {"stringValue": "hello"}}
        ]}]}]}"#;
        state
            .receiver()
            .ingest(SignalKind::Logs, body, Protocol::HttpJson)
            .unwrap();
        state
            .exporters()
            .shutdown(Duration::from_secs(1))
            .await
            .unwrap();

        let (status, json) =
            get_json(internal_routes(state.clone()), "/internal/debug/debug").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["exporter"], "debug");
        assert_eq!(json["records"].as_array().unwrap().len(), 1);

        let (status, json) = get_json(internal_routes(state), "/internal/debug/zipkin").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("zipkin"));
    }
}
