//! Exporters.
//!
//! The set of exporters is closed: each configured exporter becomes one variant of
//! [`Exporter`]. Delivery, retries and queueing live in [`registry`].
//!
//! - `debug` - writes batches to the collector log
//! - `zipkin` - POSTs spans as Zipkin v2 JSON
//! - `prometheus` - serves metrics on a scrape endpoint
//! - `loki` - POSTs logs to the Loki push API

pub mod debug;
pub mod loki;
pub mod prometheus;
pub mod registry;
pub mod retry;
pub mod zipkin;

pub use debug::DebugExporter;
pub use loki::LokiExporter;
pub use prometheus::PrometheusExporter;
pub use registry::{Destination, Exporters, ShutdownTimeout};
pub use retry::RetryPolicy;
pub use zipkin::ZipkinExporter;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use shared::config::{ExporterCommon, ExporterConfig};
use shared::models::{Batch, SignalKind};
use std::collections::BTreeMap;
use thiserror::Error;

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Errors raised while delivering a batch.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The request could not be sent or the response could not be read.
    #[error("Request to {endpoint} failed: {source}")]
    Transport {
        /// Target URL.
        endpoint: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The sink answered with a non-2xx status.
    #[error("{endpoint} responded with status {status}: {body}")]
    Status {
        /// Target URL.
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The batch could not be encoded for the sink.
    #[error("Failed to encode batch: {0}")]
    Encode(String),

    /// The exporter cannot handle this signal.
    #[error("Exporter type '{exporter}' does not support {signal}")]
    Unsupported {
        /// Exporter type.
        exporter: &'static str,
        /// Offending signal.
        signal: SignalKind,
    },

    /// The exporter could not be set up.
    #[error("Invalid exporter setup: {0}")]
    Setup(String),

    /// A listening exporter could not bind its endpoint.
    #[error("Failed to bind {endpoint}: {source}")]
    Bind {
        /// Bind address.
        endpoint: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl ExportError {
    /// Returns true if a later attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Status { .. })
    }
}

/// Builds an HTTP client with the exporter's timeout and default headers.
pub(crate) fn build_client(
    common: &ExporterCommon,
    headers: &BTreeMap<String, String>,
) -> Result<reqwest::Client, ExportError> {
    let mut default_headers = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ExportError::Setup(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ExportError::Setup(format!("invalid value for header '{name}': {e}")))?;
        default_headers.insert(name, value);
    }

    reqwest::Client::builder()
        .timeout(common.timeout())
        .default_headers(default_headers)
        .build()
        .map_err(|e| ExportError::Setup(format!("failed to build HTTP client: {e}")))
}

/// Sends a request and maps transport failures and non-2xx statuses to errors.
pub(crate) async fn send(
    request: reqwest::RequestBuilder,
    endpoint: &str,
) -> Result<(), ExportError> {
    let response = request
        .send()
        .await
        .map_err(|source| ExportError::Transport {
            endpoint: endpoint.to_string(),
            source,
        })?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(ExportError::Status {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body,
    })
}

/// A live exporter instance.
#[derive(Debug)]
pub enum Exporter {
    /// Local log sink.
    Debug(DebugExporter),
    /// Zipkin span sink.
    Zipkin(ZipkinExporter),
    /// Prometheus scrape endpoint.
    Prometheus(PrometheusExporter),
    /// Loki log sink.
    Loki(LokiExporter),
}

impl Exporter {
    /// Creates an exporter from its configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the exporter cannot be set up.
    pub fn from_config(id: &str, config: &ExporterConfig) -> Result<Self, ExportError> {
        Ok(match config {
            ExporterConfig::Debug(settings) => Self::Debug(DebugExporter::new(id, settings)),
            ExporterConfig::Zipkin(settings) => Self::Zipkin(ZipkinExporter::new(id, settings)?),
            ExporterConfig::Prometheus(settings) => {
                Self::Prometheus(PrometheusExporter::new(id, settings))
            }
            ExporterConfig::Loki(settings) => Self::Loki(LokiExporter::new(id, settings)?),
        })
    }

    /// Exporter type name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Debug(_) => "debug",
            Self::Zipkin(_) => "zipkin",
            Self::Prometheus(_) => "prometheus",
            Self::Loki(_) => "loki",
        }
    }

    /// Acquires resources that must exist before batches flow (listeners).
    ///
    /// # Errors
    ///
    /// Returns an error if a listener cannot be bound.
    pub async fn start(&self) -> Result<(), ExportError> {
        if let Self::Prometheus(exporter) = self {
            exporter.start().await?;
        }
        Ok(())
    }

    /// Delivers one batch of a single signal kind.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery failed; see [`ExportError::is_retryable`].
    pub async fn export(&self, kind: SignalKind, batch: &Batch) -> Result<(), ExportError> {
        match self {
            Self::Debug(exporter) => exporter.export(kind, batch),
            Self::Zipkin(exporter) => exporter.export(kind, batch).await,
            Self::Prometheus(exporter) => exporter.export(kind, batch),
            Self::Loki(exporter) => exporter.export(kind, batch).await,
        }
    }

    /// Releases resources acquired by [`Self::start`].
    pub async fn shutdown(&self) {
        if let Self::Prometheus(exporter) = self {
            exporter.shutdown().await;
        }
    }
}
