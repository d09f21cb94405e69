//! Telepipe Shared Library
//!
//! This crate contains the types shared by the collector and the CLI: the
//! internal telemetry model, OTLP conversions and the pipeline configuration.
//!
//! # Modules
//!
//! - [`models`] - Spans, metric points, log entries and batches
//! - [`otlp`] - OTLP protobuf types and conversions into the internal model
//! - [`config`] - Collector configuration document and validation
//!
//! # Example
//!
//! ```
//! use shared::models::{Batch, LogEntry, LogLevel, SignalKind, TelemetryRecord};
//!
//! let log = LogEntry::new(LogLevel::Info, "User logged in", "auth-service")
//!     .with_attribute("user_id", "12345");
//! assert!(log.check().is_ok());
//!
//! let batch = Batch::new(vec![TelemetryRecord::from(log)]);
//! assert_eq!(batch.partition()[0].0, SignalKind::Logs);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod models;
pub mod otlp;

/// Re-export common dependencies for convenience.
pub use chrono;
pub use serde;
pub use serde_json;
pub use validator;
