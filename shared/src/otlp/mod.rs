//! OpenTelemetry Protocol (OTLP) support.
//!
//! This module re-exports the generated OTLP protobuf types and provides the
//! conversion from OTLP export requests into internal `Batch`es.
//!
//! # Example
//!
//! ```
//! use shared::otlp::{conversions::logs_request_to_batch, proto};
//!
//! let request = proto::collector::logs::v1::ExportLogsServiceRequest::default();
//! let batch = logs_request_to_batch(&request);
//! assert!(batch.is_empty());
//! ```

pub mod conversions;

/// Generated protobuf types from the OTLP definitions (prost messages, tonic services).
pub use opentelemetry_proto::tonic as proto;
