//! The collector configuration document.

use super::components::{ExporterConfig, ReceiverConfig};
use super::ConfigError;
use crate::models::SignalKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;

/// Receivers feeding a pipeline and exporters it fans out to, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Receiver ids.
    #[serde(default)]
    pub receivers: Vec<String>,

    /// Exporter ids.
    #[serde(default)]
    pub exporters: Vec<String>,
}

/// Output format of the collector's own logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Settings for the collector's own logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    /// Default filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

/// Self-telemetry settings (`service.telemetry`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySettings {
    /// Log settings.
    #[serde(default)]
    pub logs: LogSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDocument {
    #[serde(default)]
    receivers: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    exporters: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    service: RawService,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawService {
    #[serde(default)]
    pipelines: BTreeMap<String, PipelineConfig>,
    #[serde(default)]
    telemetry: TelemetrySettings,
}

/// A resolved and validated collector configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    /// Receivers by id.
    pub receivers: BTreeMap<String, ReceiverConfig>,
    /// Exporters by id.
    pub exporters: BTreeMap<String, ExporterConfig>,
    /// Pipelines by signal.
    pub pipelines: BTreeMap<SignalKind, PipelineConfig>,
    /// Self-telemetry settings.
    pub telemetry: TelemetrySettings,
}

impl CollectorConfig {
    /// Reads, expands and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the document is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parses a document, expanding references from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is invalid.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Self::from_yaml_str_with(text, |name| std::env::var(name).ok())
    }

    /// Parses a document, expanding references with the given lookup.
    ///
    /// References are expanded inside string scalars after parsing, so a
    /// variable can never add keys or change the document structure.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is invalid.
    pub fn from_yaml_str_with<F>(text: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let document: serde_yaml::Value = if text.trim().is_empty() {
            serde_yaml::Value::Null
        } else {
            serde_yaml::from_str(text)?
        };
        let raw: RawDocument = match expand_value(document, &lookup) {
            serde_yaml::Value::Null => RawDocument::default(),
            expanded => serde_yaml::from_value(expanded)?,
        };

        let receivers = raw
            .receivers
            .into_iter()
            .map(|(id, value)| Ok((id.clone(), ReceiverConfig::parse(&id, value)?)))
            .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;

        let exporters = raw
            .exporters
            .into_iter()
            .map(|(id, value)| Ok((id.clone(), ExporterConfig::parse(&id, value)?)))
            .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;

        let pipelines = raw
            .service
            .pipelines
            .into_iter()
            .map(|(key, pipeline)| {
                let kind = SignalKind::from_str(&key)
                    .map_err(|_| ConfigError::UnknownPipeline(key.clone()))?;
                Ok((kind, pipeline))
            })
            .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;

        let config = Self {
            receivers,
            exporters,
            pipelines,
            telemetry: raw.service.telemetry,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks cross references between pipelines and components.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipelines.is_empty() {
            return Err(ConfigError::NoPipelines);
        }

        for (&kind, pipeline) in &self.pipelines {
            if pipeline.receivers.is_empty() {
                return Err(ConfigError::NoReceivers(kind));
            }
            if pipeline.exporters.is_empty() {
                return Err(ConfigError::NoExporters(kind));
            }

            check_duplicates(kind, "receiver", &pipeline.receivers)?;
            check_duplicates(kind, "exporter", &pipeline.exporters)?;

            for id in &pipeline.receivers {
                if !self.receivers.contains_key(id) {
                    return Err(ConfigError::UndefinedReceiver {
                        pipeline: kind,
                        id: id.clone(),
                    });
                }
            }

            for id in &pipeline.exporters {
                let exporter =
                    self.exporters
                        .get(id)
                        .ok_or_else(|| ConfigError::UndefinedExporter {
                            pipeline: kind,
                            id: id.clone(),
                        })?;
                if !exporter.supports(kind) {
                    return Err(ConfigError::UnsupportedSignal {
                        pipeline: kind,
                        id: id.clone(),
                        type_name: exporter.type_name(),
                    });
                }
            }
        }

        self.check_endpoint_conflicts()
    }

    fn check_endpoint_conflicts(&self) -> Result<(), ConfigError> {
        let mut listeners: Vec<(&str, String)> = Vec::new();
        for (id, receiver) in &self.receivers {
            let ReceiverConfig::Otlp(settings) = receiver;
            if let Some(grpc) = &settings.protocols.grpc {
                listeners.push((grpc.endpoint.as_str(), format!("{id} (grpc)")));
            }
            if let Some(http) = &settings.protocols.http {
                listeners.push((http.endpoint.as_str(), format!("{id} (http)")));
            }
        }
        for (id, exporter) in &self.exporters {
            if let ExporterConfig::Prometheus(settings) = exporter {
                listeners.push((settings.endpoint.as_str(), id.clone()));
            }
        }

        let mut owners: HashMap<&str, String> = HashMap::new();
        // Port 0 asks the OS for a fresh port, so it never collides.
        for (endpoint, owner) in listeners.into_iter().filter(|(e, _)| !e.ends_with(":0")) {
            if let Some(first) = owners.get(endpoint) {
                return Err(ConfigError::EndpointConflict {
                    endpoint: endpoint.to_string(),
                    first: first.clone(),
                    second: owner,
                });
            }
            owners.insert(endpoint, owner);
        }
        Ok(())
    }

    /// Returns the pipeline for a signal, if configured.
    #[must_use]
    pub fn pipeline(&self, kind: SignalKind) -> Option<&PipelineConfig> {
        self.pipelines.get(&kind)
    }

    /// Returns the exporter ids wired into the pipeline for a signal.
    #[must_use]
    pub fn exporters_for(&self, kind: SignalKind) -> &[String] {
        self.pipeline(kind).map_or(&[], |p| p.exporters.as_slice())
    }

    /// Returns every signal whose pipeline lists the given exporter.
    #[must_use]
    pub fn signals_for_exporter(&self, id: &str) -> Vec<SignalKind> {
        self.pipelines
            .iter()
            .filter(|(_, p)| p.exporters.iter().any(|e| e == id))
            .map(|(&kind, _)| kind)
            .collect()
    }
}

fn check_duplicates(
    pipeline: SignalKind,
    component: &'static str,
    ids: &[String],
) -> Result<(), ConfigError> {
    for (i, id) in ids.iter().enumerate() {
        if ids[..i].contains(id) {
            return Err(ConfigError::DuplicateReference {
                pipeline,
                component,
                id: id.clone(),
            });
        }
    }
    Ok(())
}

/// Expands references in every string scalar of a parsed document.
///
/// A scalar consisting of a single reference that expands to a number or a
/// boolean takes that type, so `timeout_ms: ${TIMEOUT}` parses.
fn expand_value<F>(value: serde_yaml::Value, lookup: &F) -> serde_yaml::Value
where
    F: Fn(&str) -> Option<String>,
{
    use serde_yaml::Value;

    match value {
        Value::String(text) => {
            let single_reference =
                text.starts_with("${") && text.find('}') == Some(text.len() - 1);
            let expanded = expand_env(&text, lookup);
            if single_reference {
                if let Ok(typed @ (Value::Number(_) | Value::Bool(_))) =
                    serde_yaml::from_str::<Value>(&expanded)
                {
                    return typed;
                }
            }
            Value::String(expanded)
        }
        Value::Sequence(items) => Value::Sequence(
            items
                .into_iter()
                .map(|item| expand_value(item, lookup))
                .collect(),
        ),
        Value::Mapping(entries) => Value::Mapping(
            entries
                .into_iter()
                .map(|(key, item)| (key, expand_value(item, lookup)))
                .collect(),
        ),
        Value::Tagged(mut tagged) => {
            tagged.value = expand_value(tagged.value, lookup);
            Value::Tagged(tagged)
        }
        other => other,
    }
}

/// Expands `${env:NAME}`, `${NAME}` and `${env:NAME:-default}` references.
///
/// `$$` produces a literal `$`. An unset variable without a default expands to an
/// empty string and logs a warning.
pub fn expand_env<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("$$") {
            out.push('$');
            rest = after;
            continue;
        }

        let Some(body_start) = tail.strip_prefix("${") else {
            out.push('$');
            rest = &tail[1..];
            continue;
        };
        let Some(end) = body_start.find('}') else {
            out.push_str(tail);
            rest = "";
            break;
        };

        let reference = &body_start[..end];
        let reference = reference.strip_prefix("env:").unwrap_or(reference);
        let (name, default) = match reference.split_once(":-") {
            Some((name, default)) => (name.trim(), Some(default)),
            None => (reference.trim(), None),
        };

        match (lookup(name), default) {
            (Some(value), _) => out.push_str(&value),
            (None, Some(default)) => out.push_str(default),
            (None, None) => {
                tracing::warn!(variable = %name, "Environment variable is not set, expanding to empty string");
            }
        }
        rest = &body_start[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExporterConfig, LineFormat, Verbosity};

    const FULL: &str = r"
receivers:
  otlp:
    protocols:
      grpc: { endpoint: 0.0.0.0:4317 }
      http: { endpoint: 0.0.0.0:4318 }
exporters:
  debug: { verbosity: normal }
  zipkin: { endpoint: http://zipkin:9411/api/v2/spans }
  prometheus: { endpoint: 0.0.0.0:8889, namespace: demo }
  loki: { endpoint: http://loki:3100/loki/api/v1/push }
service:
  pipelines:
    traces:  { receivers: [otlp], exporters: [zipkin, debug] }
    metrics: { receivers: [otlp], exporters: [prometheus] }
    logs:    { receivers: [otlp], exporters: [loki, debug] }
  telemetry:
    logs: { level: debug, format: json }
";

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_full_document() {
        let config = CollectorConfig::from_yaml_str_with(FULL, no_env).unwrap();

        assert_eq!(config.receivers.len(), 1);
        assert_eq!(config.exporters.len(), 4);
        assert_eq!(config.exporters_for(SignalKind::Traces), ["zipkin", "debug"]);
        assert_eq!(config.exporters_for(SignalKind::Metrics), ["prometheus"]);
        assert_eq!(
            config.signals_for_exporter("debug"),
            vec![SignalKind::Traces, SignalKind::Logs]
        );
        assert!(config.signals_for_exporter("unused").is_empty());
        assert_eq!(config.telemetry.logs.level, "debug");
        assert_eq!(config.telemetry.logs.format, LogFormat::Json);

        let ExporterConfig::Debug(debug) = &config.exporters["debug"] else {
            panic!("expected debug exporter");
        };
        assert_eq!(debug.verbosity, Verbosity::Normal);
        let ExporterConfig::Loki(loki) = &config.exporters["loki"] else {
            panic!("expected loki exporter");
        };
        assert_eq!(loki.line_format, LineFormat::Json);
    }

    #[test]
    fn test_undefined_exporter_fails() {
        let doc = r"
receivers: { otlp: { protocols: { http: {} } } }
exporters: { debug: }
service:
  pipelines:
    traces: { receivers: [otlp], exporters: [zipkin] }
";
        let err = CollectorConfig::from_yaml_str_with(doc, no_env).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UndefinedExporter { pipeline: SignalKind::Traces, ref id } if id == "zipkin"
        ));
    }

    #[test]
    fn test_undefined_receiver_fails() {
        let doc = r"
receivers: { otlp: { protocols: { http: {} } } }
exporters: { debug: }
service:
  pipelines:
    logs: { receivers: [otlp/other], exporters: [debug] }
";
        let err = CollectorConfig::from_yaml_str_with(doc, no_env).unwrap_err();
        assert!(matches!(err, ConfigError::UndefinedReceiver { .. }));
    }

    #[test]
    fn test_unsupported_signal_fails() {
        let doc = r"
receivers: { otlp: { protocols: { http: {} } } }
exporters: { loki: { endpoint: 'http://loki:3100/loki/api/v1/push' } }
service:
  pipelines:
    traces: { receivers: [otlp], exporters: [loki] }
";
        let err = CollectorConfig::from_yaml_str_with(doc, no_env).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnsupportedSignal { type_name: "loki", .. }
        ));
    }

    #[test]
    fn test_structural_errors() {
        let empty = "receivers: { otlp: { protocols: { http: {} } } }";
        assert!(matches!(
            CollectorConfig::from_yaml_str_with(empty, no_env),
            Err(ConfigError::NoPipelines)
        ));

        let unknown_key = r"
receivers: { otlp: { protocols: { http: {} } } }
exporters: { debug: }
service: { pipelines: { profiles: { receivers: [otlp], exporters: [debug] } } }
";
        assert!(matches!(
            CollectorConfig::from_yaml_str_with(unknown_key, no_env),
            Err(ConfigError::UnknownPipeline(ref key)) if key == "profiles"
        ));

        let duplicate = r"
receivers: { otlp: { protocols: { http: {} } } }
exporters: { debug: }
service: { pipelines: { logs: { receivers: [otlp], exporters: [debug, debug] } } }
";
        assert!(matches!(
            CollectorConfig::from_yaml_str_with(duplicate, no_env),
            Err(ConfigError::DuplicateReference { component: "exporter", .. })
        ));

        let no_exporters = r"
receivers: { otlp: { protocols: { http: {} } } }
service: { pipelines: { logs: { receivers: [otlp] } } }
";
        assert!(matches!(
            CollectorConfig::from_yaml_str_with(no_exporters, no_env),
            Err(ConfigError::NoExporters(SignalKind::Logs))
        ));
    }

    #[test]
    fn test_endpoint_conflict_fails() {
        let doc = r"
receivers: { otlp: { protocols: { http: { endpoint: '0.0.0.0:8889' } } } }
exporters: { prometheus: { endpoint: '0.0.0.0:8889' } }
service: { pipelines: { metrics: { receivers: [otlp], exporters: [prometheus] } } }
";
        let err = CollectorConfig::from_yaml_str_with(doc, no_env).unwrap_err();
        assert!(matches!(err, ConfigError::EndpointConflict { .. }));

        let ephemeral = doc.replace("8889", "0");
        assert!(CollectorConfig::from_yaml_str_with(&ephemeral, no_env).is_ok());
    }

    #[test]
    fn test_env_references_are_expanded_in_string_values() {
        let doc = r"
receivers: { otlp: { protocols: { http: { endpoint: '${env:HTTP_ADDR:-0.0.0.0:4318}' } } } }
exporters: { zipkin: { endpoint: '${ZIPKIN_URL}' } }
service: { pipelines: { traces: { receivers: [otlp], exporters: [zipkin] } } }
";
        let lookup = |name: &str| {
            (name == "ZIPKIN_URL").then(|| "http://zipkin:9411/api/v2/spans".to_string())
        };
        let config = CollectorConfig::from_yaml_str_with(doc, lookup).unwrap();

        let ExporterConfig::Zipkin(zipkin) = &config.exporters["zipkin"] else {
            panic!("expected zipkin exporter");
        };
        assert_eq!(zipkin.endpoint, "http://zipkin:9411/api/v2/spans");
        let ReceiverConfig::Otlp(otlp) = &config.receivers["otlp"];
        assert_eq!(otlp.protocols.http.as_ref().unwrap().endpoint, "0.0.0.0:4318");
    }

    #[test]
    fn test_env_values_cannot_inject_keys() {
        let doc = r"
receivers: { otlp: { protocols: { http: {} } } }
exporters:
  loki:
    endpoint: http://loki:3100/loki/api/v1/push
    timeout_ms: ${TIMEOUT}
    labels:
      env: ${DEPLOY_ENV}
service: { pipelines: { logs: { receivers: [otlp], exporters: [loki] } } }
";
        let lookup = |name: &str| match name {
            "DEPLOY_ENV" => Some("dev\n    tenant_id: injected".to_string()),
            "TIMEOUT" => Some("250".to_string()),
            _ => None,
        };
        let config = CollectorConfig::from_yaml_str_with(doc, lookup).unwrap();

        let ExporterConfig::Loki(loki) = &config.exporters["loki"] else {
            panic!("expected loki exporter");
        };
        assert_eq!(loki.labels["env"], "dev\n    tenant_id: injected");
        assert_eq!(loki.tenant_id, None);
        assert_eq!(loki.common.timeout_ms, 250);
    }

    #[test]
    fn test_expand_env() {
        let lookup = |name: &str| match name {
            "HOST" => Some("loki".to_string()),
            _ => None,
        };
        assert_eq!(expand_env("http://${HOST}:3100", lookup), "http://loki:3100");
        assert_eq!(expand_env("${env:HOST}", lookup), "loki");
        assert_eq!(expand_env("${env:PORT:-3100}", lookup), "3100");
        assert_eq!(expand_env("${MISSING}", lookup), "");
        assert_eq!(expand_env("cost: $$5", lookup), "cost: $5");
        assert_eq!(expand_env("plain $ sign", lookup), "plain $ sign");
        assert_eq!(expand_env("open ${HOST", lookup), "open ${HOST");
    }

    #[test]
    fn test_from_file_missing() {
        let err = CollectorConfig::from_file("/nonexistent/telepipe.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
