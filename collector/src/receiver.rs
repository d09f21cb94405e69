//! OTLP receiver core shared by the HTTP and gRPC front ends.
//!
//! A receiver decodes an export request into a [`Batch`] and pushes it into the
//! pipeline router. It never waits for delivery.

use crate::metrics::Stats;
use crate::pipeline::PipelineRouter;
use prost::Message;
use shared::models::{Batch, SignalKind};
use shared::otlp::conversions::{
    logs_request_to_batch, metrics_request_to_batch, traces_request_to_batch,
};
use shared::otlp::proto;
use std::sync::Arc;
use thiserror::Error;

/// Wire encoding of an export request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Protobuf received over gRPC.
    Grpc,
    /// Protobuf received over HTTP (`application/x-protobuf`).
    HttpProtobuf,
    /// OTLP JSON received over HTTP (`application/json`).
    HttpJson,
}

/// A payload that could not be decoded. The whole request is rejected.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Invalid protobuf.
    #[error("Failed to decode protobuf: {0}")]
    Protobuf(#[from] prost::DecodeError),

    /// Invalid OTLP JSON.
    #[error("Failed to decode JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decodes an export request of the given signal into a batch.
///
/// # Errors
///
/// Returns an error if the payload is not a valid export request.
pub fn decode(signal: SignalKind, raw: &[u8], protocol: Protocol) -> Result<Batch, DecodeError> {
    use proto::collector::{logs, metrics, trace};

    let batch = match (signal, protocol) {
        (SignalKind::Traces, Protocol::HttpJson) => {
            traces_request_to_batch(&serde_json::from_slice::<
                trace::v1::ExportTraceServiceRequest,
            >(raw)?)
        }
        (SignalKind::Traces, Protocol::Grpc | Protocol::HttpProtobuf) => {
            traces_request_to_batch(&trace::v1::ExportTraceServiceRequest::decode(raw)?)
        }
        (SignalKind::Metrics, Protocol::HttpJson) => {
            metrics_request_to_batch(&serde_json::from_slice::<
                metrics::v1::ExportMetricsServiceRequest,
            >(raw)?)
        }
        (SignalKind::Metrics, Protocol::Grpc | Protocol::HttpProtobuf) => {
            metrics_request_to_batch(&metrics::v1::ExportMetricsServiceRequest::decode(raw)?)
        }
        (SignalKind::Logs, Protocol::HttpJson) => {
            logs_request_to_batch(&serde_json::from_slice::<logs::v1::ExportLogsServiceRequest>(
                raw,
            )?)
        }
        (SignalKind::Logs, Protocol::Grpc | Protocol::HttpProtobuf) => {
            logs_request_to_batch(&logs::v1::ExportLogsServiceRequest::decode(raw)?)
        }
    };
    Ok(batch)
}

/// Outcome of one accepted export request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Records handed to a pipeline.
    pub accepted: usize,
    /// Records dropped during decoding.
    pub rejected: u64,
    /// Records no pipeline accepts from this receiver.
    pub refused: usize,
}

impl IngestSummary {
    /// Records to report back to the client as rejected (OTLP partial success).
    #[must_use]
    pub fn not_accepted(&self) -> i64 {
        i64::try_from(self.rejected + self.refused as u64).unwrap_or(i64::MAX)
    }
}

/// One configured OTLP receiver.
#[derive(Debug, Clone)]
pub struct Receiver {
    id: Arc<str>,
    router: Arc<PipelineRouter>,
    stats: Arc<Stats>,
}

impl Receiver {
    /// Creates a receiver that feeds `router`.
    #[must_use]
    pub fn new(id: &str, router: Arc<PipelineRouter>, stats: Arc<Stats>) -> Self {
        Self {
            id: Arc::from(id),
            router,
            stats,
        }
    }

    /// Receiver id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Decodes a raw export request and routes the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be decoded; nothing is routed then.
    pub fn ingest(
        &self,
        signal: SignalKind,
        raw: &[u8],
        protocol: Protocol,
    ) -> Result<IngestSummary, DecodeError> {
        let batch = decode(signal, raw, protocol).inspect_err(|e| {
            self.stats.record_malformed(signal);
            tracing::warn!(receiver = %self.id, %signal, ?protocol, error = %e, "Rejected malformed export request");
        })?;
        Ok(self.accept(signal, batch))
    }

    /// Routes an already decoded batch.
    pub fn accept(&self, signal: SignalKind, batch: Batch) -> IngestSummary {
        let rejected = batch.rejected;
        if rejected > 0 {
            self.stats.record_rejected(signal, rejected);
        }

        let route = if batch.is_empty() {
            crate::pipeline::RouteSummary::default()
        } else {
            self.router.route(&self.id, batch)
        };

        tracing::debug!(
            receiver = %self.id,
            %signal,
            accepted = route.routed,
            rejected,
            refused = route.refused,
            "Processed export request"
        );

        IngestSummary {
            accepted: route.routed,
            rejected,
            refused: route.refused,
        }
    }
}
