//! Configuration for Telepipe.
//!
//! The collector is configured by a single YAML document enumerating receivers,
//! exporters and per-signal pipelines. It is resolved and validated once at startup.

pub mod components;
pub mod document;
pub mod error;

pub use components::{
    component_type, DebugSettings, ExporterCommon, ExporterConfig, GrpcSettings, HttpSettings,
    LineFormat, LokiSettings, OtlpProtocols, OtlpReceiverSettings, PrometheusSettings,
    QueueSettings, ReceiverConfig, RetrySettings, Verbosity, ZipkinSettings,
};
pub use document::{
    expand_env, CollectorConfig, LogFormat, LogSettings, PipelineConfig, TelemetrySettings,
};
pub use error::ConfigError;
