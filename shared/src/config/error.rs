//! Configuration errors.

use crate::models::SignalKind;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating the collector configuration.
///
/// Every variant is fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration file '{path}': {source}")]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid YAML or does not match the expected shape.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A component id names a type that does not exist.
    #[error("Unknown {component} type '{type_name}' in '{id}'")]
    UnknownComponentType {
        /// `receiver` or `exporter`.
        component: &'static str,
        /// The full component id.
        id: String,
        /// The type part of the id.
        type_name: String,
    },

    /// A component's settings failed validation.
    #[error("Invalid settings for {component} '{id}': {reason}")]
    InvalidComponent {
        /// `receiver` or `exporter`.
        component: &'static str,
        /// The full component id.
        id: String,
        /// What is wrong.
        reason: String,
    },

    /// A pipeline key is not a signal kind.
    #[error("Unknown pipeline '{0}' (expected traces, metrics or logs)")]
    UnknownPipeline(String),

    /// `service.pipelines` is empty.
    #[error("No pipelines configured under service.pipelines")]
    NoPipelines,

    /// A pipeline lists no receivers.
    #[error("Pipeline '{0}' has no receivers")]
    NoReceivers(SignalKind),

    /// A pipeline lists no exporters.
    #[error("Pipeline '{0}' has no exporters")]
    NoExporters(SignalKind),

    /// A pipeline references a receiver that is not defined.
    #[error("Pipeline '{pipeline}' references undefined receiver '{id}'")]
    UndefinedReceiver {
        /// The pipeline signal.
        pipeline: SignalKind,
        /// The missing receiver id.
        id: String,
    },

    /// A pipeline references an exporter that is not defined.
    #[error("Pipeline '{pipeline}' references undefined exporter '{id}'")]
    UndefinedExporter {
        /// The pipeline signal.
        pipeline: SignalKind,
        /// The missing exporter id.
        id: String,
    },

    /// A pipeline lists the same component twice.
    #[error("Pipeline '{pipeline}' lists {component} '{id}' more than once")]
    DuplicateReference {
        /// The pipeline signal.
        pipeline: SignalKind,
        /// `receiver` or `exporter`.
        component: &'static str,
        /// The repeated id.
        id: String,
    },

    /// An exporter is wired into a pipeline whose signal it cannot handle.
    #[error("Exporter '{id}' of type '{type_name}' does not support {pipeline}")]
    UnsupportedSignal {
        /// The pipeline signal.
        pipeline: SignalKind,
        /// The exporter id.
        id: String,
        /// The exporter type.
        type_name: &'static str,
    },

    /// Two listeners are configured on the same endpoint.
    #[error("Endpoint '{endpoint}' is used by both '{first}' and '{second}'")]
    EndpointConflict {
        /// The shared endpoint.
        endpoint: String,
        /// First user.
        first: String,
        /// Second user.
        second: String,
    },
}
