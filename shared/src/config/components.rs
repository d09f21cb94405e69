//! Receiver and exporter settings.
//!
//! Component ids follow the `type[/name]` convention: the part before the first `/`
//! selects the implementation, so `zipkin` and `zipkin/backup` are both Zipkin exporters.

use super::ConfigError;
use crate::models::SignalKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use validator::Validate;

/// Returns the type part of a component id.
#[must_use]
pub fn component_type(id: &str) -> &str {
    id.split_once('/').map_or(id, |(type_name, _)| type_name)
}

/// Checks that an endpoint looks like `host:port` with a numeric port.
pub(crate) fn check_listen_endpoint(endpoint: &str) -> Result<(), String> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| format!("endpoint '{endpoint}' must be host:port"))?;
    if host.is_empty() {
        return Err(format!("endpoint '{endpoint}' is missing a host"));
    }
    port.parse::<u16>()
        .map_err(|_| format!("endpoint '{endpoint}' has an invalid port"))?;
    Ok(())
}

fn default_grpc_endpoint() -> String {
    "0.0.0.0:4317".to_string()
}

fn default_http_endpoint() -> String {
    "0.0.0.0:4318".to_string()
}

fn default_max_body_bytes() -> usize {
    4 * 1024 * 1024
}

/// OTLP/gRPC listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrpcSettings {
    /// Bind address.
    #[serde(default = "default_grpc_endpoint")]
    pub endpoint: String,
}

/// OTLP/HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSettings {
    /// Bind address.
    #[serde(default = "default_http_endpoint")]
    pub endpoint: String,

    /// Largest accepted request body.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Protocols enabled on an OTLP receiver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OtlpProtocols {
    /// gRPC listener, if enabled.
    #[serde(default)]
    pub grpc: Option<GrpcSettings>,

    /// HTTP listener, if enabled.
    #[serde(default)]
    pub http: Option<HttpSettings>,
}

/// Settings of an `otlp` receiver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OtlpReceiverSettings {
    /// Enabled protocols.
    #[serde(default)]
    pub protocols: OtlpProtocols,
}

/// A configured receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverConfig {
    /// OTLP over gRPC and/or HTTP.
    Otlp(OtlpReceiverSettings),
}

impl ReceiverConfig {
    /// Parses receiver settings for the given id.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unknown, the settings do not parse, or no
    /// protocol is enabled.
    pub fn parse(id: &str, value: serde_yaml::Value) -> Result<Self, ConfigError> {
        let value = null_as_empty_mapping(value);
        match component_type(id) {
            "otlp" => {
                let settings: OtlpReceiverSettings =
                    serde_yaml::from_value(value).map_err(|e| invalid("receiver", id, e))?;
                let protocols = &settings.protocols;
                if protocols.grpc.is_none() && protocols.http.is_none() {
                    return Err(invalid("receiver", id, "at least one protocol must be enabled"));
                }
                for endpoint in protocols
                    .grpc
                    .iter()
                    .map(|g| &g.endpoint)
                    .chain(protocols.http.iter().map(|h| &h.endpoint))
                {
                    check_listen_endpoint(endpoint).map_err(|e| invalid("receiver", id, e))?;
                }
                Ok(Self::Otlp(settings))
            }
            other => Err(ConfigError::UnknownComponentType {
                component: "receiver",
                id: id.to_string(),
                type_name: other.to_string(),
            }),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_interval_ms() -> u64 {
    500
}

fn default_max_interval_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

/// Retry policy for transient export failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    /// When false every batch gets exactly one attempt.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, message = "max_attempts must be at least 1"))]
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Upper bound for any single delay.
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    /// Growth factor between consecutive delays.
    #[serde(default = "default_multiplier")]
    #[validate(range(min = 1.0, message = "multiplier must be at least 1.0"))]
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_queue_size() -> usize {
    100
}

/// Bounded queue in front of an exporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct QueueSettings {
    /// Maximum number of batches held per signal before the oldest is evicted.
    #[serde(default = "default_queue_size")]
    #[validate(range(min = 1, message = "queue_size must be at least 1"))]
    pub queue_size: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    5_000
}

/// Settings every exporter accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ExporterCommon {
    /// Per-request timeout for push exporters.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retry policy.
    #[serde(default)]
    #[validate(nested)]
    pub retry_on_failure: RetrySettings,

    /// Queue settings.
    #[serde(default)]
    #[validate(nested)]
    pub sending_queue: QueueSettings,
}

impl ExporterCommon {
    /// Returns the request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ExporterCommon {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retry_on_failure: RetrySettings::default(),
            sending_queue: QueueSettings::default(),
        }
    }
}

/// How much the debug exporter writes per batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// One summary line per batch.
    #[default]
    Basic,
    /// One line per record.
    Normal,
    /// Full JSON per record.
    Detailed,
}

/// Settings of a `debug` exporter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct DebugSettings {
    /// Output verbosity.
    #[serde(default)]
    pub verbosity: Verbosity,

    /// Number of most recent records kept for inspection (0 disables retention).
    #[serde(default)]
    #[validate(range(max = 100_000, message = "retain must be at most 100000"))]
    pub retain: usize,

    /// Common exporter settings.
    #[serde(flatten)]
    #[validate(nested)]
    pub common: ExporterCommon,
}

/// Settings of a `zipkin` exporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ZipkinSettings {
    /// Span ingestion URL, e.g. `http://zipkin:9411/api/v2/spans`.
    #[validate(url(message = "endpoint must be a valid URL"))]
    pub endpoint: String,

    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Common exporter settings.
    #[serde(flatten)]
    #[validate(nested)]
    pub common: ExporterCommon,
}

fn default_metric_expiration_secs() -> u64 {
    300
}

/// Settings of a `prometheus` exporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct PrometheusSettings {
    /// Scrape listener bind address, e.g. `0.0.0.0:8889`.
    pub endpoint: String,

    /// Prefix added to every metric name.
    #[serde(default)]
    pub namespace: Option<String>,

    /// Labels added to every series.
    #[serde(default)]
    pub const_labels: BTreeMap<String, String>,

    /// Series not updated for this long are no longer exposed.
    #[serde(default = "default_metric_expiration_secs")]
    pub metric_expiration_secs: u64,

    /// Common exporter settings.
    #[serde(flatten)]
    #[validate(nested)]
    pub common: ExporterCommon,
}

impl PrometheusSettings {
    /// Returns the series expiration as a `Duration`.
    #[must_use]
    pub fn metric_expiration(&self) -> Duration {
        Duration::from_secs(self.metric_expiration_secs)
    }
}

/// How the Loki exporter renders a log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineFormat {
    /// The body as-is.
    Raw,
    /// A JSON object with body, attributes and correlation ids.
    #[default]
    Json,
}

/// Settings of a `loki` exporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LokiSettings {
    /// Push URL, e.g. `http://loki:3100/loki/api/v1/push`.
    #[validate(url(message = "endpoint must be a valid URL"))]
    pub endpoint: String,

    /// Value for the `X-Scope-OrgID` header in multi-tenant setups.
    #[serde(default)]
    pub tenant_id: Option<String>,

    /// Static stream labels added to every stream.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Line rendering.
    #[serde(default)]
    pub line_format: LineFormat,

    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Common exporter settings.
    #[serde(flatten)]
    #[validate(nested)]
    pub common: ExporterCommon,
}

/// A configured exporter. The set of exporter types is closed.
#[derive(Debug, Clone, PartialEq)]
pub enum ExporterConfig {
    /// Local inspection sink.
    Debug(DebugSettings),
    /// Zipkin v2 JSON over HTTP.
    Zipkin(ZipkinSettings),
    /// Prometheus scrape endpoint.
    Prometheus(PrometheusSettings),
    /// Loki push API.
    Loki(LokiSettings),
}

impl ExporterConfig {
    /// Parses exporter settings for the given id.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unknown or the settings are invalid.
    pub fn parse(id: &str, value: serde_yaml::Value) -> Result<Self, ConfigError> {
        let value = null_as_empty_mapping(value);
        let config = match component_type(id) {
            "debug" => Self::Debug(parse_validated(id, value)?),
            "zipkin" => Self::Zipkin(parse_validated(id, value)?),
            "prometheus" => {
                let settings: PrometheusSettings = parse_validated(id, value)?;
                check_listen_endpoint(&settings.endpoint)
                    .map_err(|e| invalid("exporter", id, e))?;
                Self::Prometheus(settings)
            }
            "loki" => Self::Loki(parse_validated(id, value)?),
            other => {
                return Err(ConfigError::UnknownComponentType {
                    component: "exporter",
                    id: id.to_string(),
                    type_name: other.to_string(),
                })
            }
        };
        Ok(config)
    }

    /// Returns the exporter type name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Debug(_) => "debug",
            Self::Zipkin(_) => "zipkin",
            Self::Prometheus(_) => "prometheus",
            Self::Loki(_) => "loki",
        }
    }

    /// Returns true if the exporter can handle the given signal.
    #[must_use]
    pub fn supports(&self, kind: SignalKind) -> bool {
        match self {
            Self::Debug(_) => true,
            Self::Zipkin(_) => kind == SignalKind::Traces,
            Self::Prometheus(_) => kind == SignalKind::Metrics,
            Self::Loki(_) => kind == SignalKind::Logs,
        }
    }

    /// Returns the settings shared by all exporters.
    #[must_use]
    pub fn common(&self) -> &ExporterCommon {
        match self {
            Self::Debug(s) => &s.common,
            Self::Zipkin(s) => &s.common,
            Self::Prometheus(s) => &s.common,
            Self::Loki(s) => &s.common,
        }
    }
}

/// An absent value (`debug:` with nothing after it) means "all defaults".
fn null_as_empty_mapping(value: serde_yaml::Value) -> serde_yaml::Value {
    if value.is_null() {
        serde_yaml::Value::Mapping(serde_yaml::Mapping::new())
    } else {
        value
    }
}

fn invalid(component: &'static str, id: &str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidComponent {
        component,
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_validated<T>(id: &str, value: serde_yaml::Value) -> Result<T, ConfigError>
where
    T: serde::de::DeserializeOwned + Serialize + Validate,
{
    let settings: T =
        serde_yaml::from_value(value.clone()).map_err(|e| invalid("exporter", id, e))?;
    reject_unknown_keys(id, &value, &settings)?;
    settings
        .validate()
        .map_err(|e| invalid("exporter", id, e))?;
    Ok(settings)
}

/// Exporter settings flatten `ExporterCommon`, which rules out
/// `deny_unknown_fields`. Unknown keys are found by comparing the input with
/// the re-serialized settings instead.
fn reject_unknown_keys<T: Serialize>(
    id: &str,
    input: &serde_yaml::Value,
    settings: &T,
) -> Result<(), ConfigError> {
    let serde_yaml::Value::Mapping(input) = input else {
        return Ok(());
    };
    let known = serde_yaml::to_value(settings).map_err(|e| invalid("exporter", id, e))?;
    let known = known.as_mapping();
    for key in input.keys() {
        let name = key.as_str();
        if !name.is_some_and(|name| known.is_some_and(|m| m.contains_key(name))) {
            let name = name.map_or_else(|| format!("{key:?}"), str::to_string);
            return Err(invalid("exporter", id, format!("unknown field `{name}`")));
        }
    }
    Ok(())
}
