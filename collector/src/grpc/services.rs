//! gRPC service implementations for the OTLP receiver.
//!
//! Tonic has already decoded the request when these run, so they convert the
//! message into a batch and hand it to the receiver.

use crate::receiver::{IngestSummary, Receiver};
use shared::models::SignalKind;
use shared::otlp::conversions::{
    logs_request_to_batch, metrics_request_to_batch, traces_request_to_batch,
};
use shared::otlp::proto;
use tonic::{Request, Response, Status};

fn rejection_message(summary: &IngestSummary, noun: &str) -> Option<String> {
    let count = summary.not_accepted();
    (count > 0).then(|| {
        format!(
            "{count} {noun} were rejected ({} invalid, {} not routed)",
            summary.rejected, summary.refused
        )
    })
}

/// Implementation of the OTLP `LogsService` gRPC service.
#[derive(Debug, Clone)]
pub struct LogsServiceImpl {
    receiver: Receiver,
}

impl LogsServiceImpl {
    /// Creates a service that feeds `receiver`.
    #[must_use]
    pub fn new(receiver: Receiver) -> Self {
        Self { receiver }
    }
}

#[tonic::async_trait]
impl proto::collector::logs::v1::logs_service_server::LogsService for LogsServiceImpl {
    async fn export(
        &self,
        request: Request<proto::collector::logs::v1::ExportLogsServiceRequest>,
    ) -> Result<Response<proto::collector::logs::v1::ExportLogsServiceResponse>, Status> {
        let batch = logs_request_to_batch(request.get_ref());
        let summary = self.receiver.accept(SignalKind::Logs, batch);

        Ok(Response::new(
            proto::collector::logs::v1::ExportLogsServiceResponse {
                partial_success: rejection_message(&summary, "log records").map(
                    |error_message| proto::collector::logs::v1::ExportLogsPartialSuccess {
                        rejected_log_records: summary.not_accepted(),
                        error_message,
                    },
                ),
            },
        ))
    }
}

/// Implementation of the OTLP `MetricsService` gRPC service.
#[derive(Debug, Clone)]
pub struct MetricsServiceImpl {
    receiver: Receiver,
}

impl MetricsServiceImpl {
    /// Creates a service that feeds `receiver`.
    #[must_use]
    pub fn new(receiver: Receiver) -> Self {
        Self { receiver }
    }
}

#[tonic::async_trait]
impl proto::collector::metrics::v1::metrics_service_server::MetricsService for MetricsServiceImpl {
    async fn export(
        &self,
        request: Request<proto::collector::metrics::v1::ExportMetricsServiceRequest>,
    ) -> Result<Response<proto::collector::metrics::v1::ExportMetricsServiceResponse>, Status>
    {
        let batch = metrics_request_to_batch(request.get_ref());
        let summary = self.receiver.accept(SignalKind::Metrics, batch);

        Ok(Response::new(
            proto::collector::metrics::v1::ExportMetricsServiceResponse {
                partial_success: rejection_message(&summary, "data points").map(
                    |error_message| proto::collector::metrics::v1::ExportMetricsPartialSuccess {
                        rejected_data_points: summary.not_accepted(),
                        error_message,
                    },
                ),
            },
        ))
    }
}

/// Implementation of the OTLP `TraceService` gRPC service.
#[derive(Debug, Clone)]
pub struct TracesServiceImpl {
    receiver: Receiver,
}

impl TracesServiceImpl {
    /// Creates a service that feeds `receiver`.
    #[must_use]
    pub fn new(receiver: Receiver) -> Self {
        Self { receiver }
    }
}

#[tonic::async_trait]
impl proto::collector::trace::v1::trace_service_server::TraceService for TracesServiceImpl {
    async fn export(
        &self,
        request: Request<proto::collector::trace::v1::ExportTraceServiceRequest>,
    ) -> Result<Response<proto::collector::trace::v1::ExportTraceServiceResponse>, Status> {
        let batch = traces_request_to_batch(request.get_ref());
        let summary = self.receiver.accept(SignalKind::Traces, batch);

        Ok(Response::new(
            proto::collector::trace::v1::ExportTraceServiceResponse {
                partial_success: rejection_message(&summary, "spans").map(|error_message| {
                    proto::collector::trace::v1::ExportTracePartialSuccess {
                        rejected_spans: summary.not_accepted(),
                        error_message,
                    }
                }),
            },
        ))
    }
}
