//! OTLP HTTP receiver endpoints.
//!
//! Supports both protobuf (`application/x-protobuf`) and JSON (`application/json`)
//! request bodies. The response uses the encoding of the request.
//!
//! # Endpoints
//!
//! - `POST /v1/logs` - Ingest OTLP logs
//! - `POST /v1/metrics` - Ingest OTLP metrics
//! - `POST /v1/traces` - Ingest OTLP traces

use crate::receiver::{IngestSummary, Protocol};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use prost::Message;
use serde::{Deserialize, Serialize};
use shared::models::SignalKind;
use shared::otlp::proto;

/// Content type for protobuf requests.
const CONTENT_TYPE_PROTOBUF: &str = "application/x-protobuf";

/// Content type for JSON requests.
const CONTENT_TYPE_JSON: &str = "application/json";

/// Response for OTLP export requests.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResponse {
    /// Present when some records were not accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_success: Option<PartialSuccess>,
}

/// Partial success information.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialSuccess {
    /// Number of rejected items.
    pub rejected_count: i64,
    /// Why items were rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Error response for OTLP endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct OtlpError {
    /// HTTP status code.
    pub code: u32,
    /// Error message.
    pub message: String,
}

type OtlpResult = Result<Response, (StatusCode, Json<OtlpError>)>;

/// Creates the OTLP routes with application state.
pub fn otlp_routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/logs", post(ingest_logs))
        .route("/v1/metrics", post(ingest_metrics))
        .route("/v1/traces", post(ingest_traces))
        .with_state(state)
}

/// Handler for OTLP logs ingestion.
async fn ingest_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> OtlpResult {
    export(&state, SignalKind::Logs, &headers, &body)
}

/// Handler for OTLP metrics ingestion.
async fn ingest_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> OtlpResult {
    export(&state, SignalKind::Metrics, &headers, &body)
}

/// Handler for OTLP traces ingestion.
async fn ingest_traces(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> OtlpResult {
    export(&state, SignalKind::Traces, &headers, &body)
}

/// Picks the decoder from the `Content-Type` header. A missing header means JSON.
fn request_protocol(headers: &HeaderMap) -> Option<Protocol> {
    let Some(content_type) = headers.get(header::CONTENT_TYPE) else {
        return Some(Protocol::HttpJson);
    };
    let content_type = content_type.to_str().ok()?;
    if content_type.starts_with(CONTENT_TYPE_PROTOBUF) {
        Some(Protocol::HttpProtobuf)
    } else if content_type.starts_with(CONTENT_TYPE_JSON) {
        Some(Protocol::HttpJson)
    } else {
        None
    }
}

fn otlp_error(status: StatusCode, message: String) -> (StatusCode, Json<OtlpError>) {
    (
        status,
        Json(OtlpError {
            code: u32::from(status.as_u16()),
            message,
        }),
    )
}

/// Decodes and routes one export request. Never waits for delivery.
fn export(state: &AppState, signal: SignalKind, headers: &HeaderMap, body: &[u8]) -> OtlpResult {
    let protocol = request_protocol(headers).ok_or_else(|| {
        state.stats().record_malformed(signal);
        otlp_error(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!(
                "Unsupported content type, expected {CONTENT_TYPE_PROTOBUF} or {CONTENT_TYPE_JSON}"
            ),
        )
    })?;

    let summary = state
        .receiver()
        .ingest(signal, body, protocol)
        .map_err(|e| otlp_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    Ok(match protocol {
        Protocol::HttpProtobuf => protobuf_response(signal, &summary),
        Protocol::HttpJson | Protocol::Grpc => {
            Json(json_response(signal, &summary)).into_response()
        }
    })
}

fn rejection_message(signal: SignalKind, summary: &IngestSummary) -> Option<String> {
    let count = summary.not_accepted();
    if count == 0 {
        return None;
    }
    let noun = match signal {
        SignalKind::Traces => "spans",
        SignalKind::Metrics => "data points",
        SignalKind::Logs => "log records",
    };
    Some(format!(
        "{count} {noun} were rejected ({} invalid, {} not routed)",
        summary.rejected, summary.refused
    ))
}

fn json_response(signal: SignalKind, summary: &IngestSummary) -> ExportResponse {
    ExportResponse {
        partial_success: rejection_message(signal, summary).map(|message| PartialSuccess {
            rejected_count: summary.not_accepted(),
            error_message: Some(message),
        }),
    }
}

fn protobuf_response(signal: SignalKind, summary: &IngestSummary) -> Response {
    use proto::collector::{logs, metrics, trace};

    let rejected = summary.not_accepted();
    let message = rejection_message(signal, summary);
    let bytes = match signal {
        SignalKind::Traces => trace::v1::ExportTraceServiceResponse {
            partial_success: message.map(|error_message| trace::v1::ExportTracePartialSuccess {
                rejected_spans: rejected,
                error_message,
            }),
        }
        .encode_to_vec(),
        SignalKind::Metrics => metrics::v1::ExportMetricsServiceResponse {
            partial_success: message.map(|error_message| {
                metrics::v1::ExportMetricsPartialSuccess {
                    rejected_data_points: rejected,
                    error_message,
                }
            }),
        }
        .encode_to_vec(),
        SignalKind::Logs => logs::v1::ExportLogsServiceResponse {
            partial_success: message.map(|error_message| logs::v1::ExportLogsPartialSuccess {
                rejected_log_records: rejected,
                error_message,
            }),
        }
        .encode_to_vec(),
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, CONTENT_TYPE_PROTOBUF)],
        bytes,
    )
        .into_response()
}
