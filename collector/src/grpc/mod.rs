//! OTLP gRPC receiver services.
//!
//! Each OTLP receiver with a gRPC protocol serves all three services on one listener.
//! Requests for a signal without a pipeline succeed with every record reported as
//! rejected.

mod services;

pub use services::{LogsServiceImpl, MetricsServiceImpl, TracesServiceImpl};
