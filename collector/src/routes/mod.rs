//! HTTP route definitions.
//!
//! Every OTLP receiver with an HTTP protocol serves these routes on its own listener.

mod health;
mod internal;
mod otlp;

pub use health::{health_routes, HealthResponse};
pub use internal::{internal_routes, ErrorResponse, RetainedRecords};
pub use otlp::{otlp_routes, ExportResponse, OtlpError, PartialSuccess};
