//! Conversions between OTLP protobuf types and internal telemetry records.
//!
//! Every export request is flattened into a `Batch`. Records that cannot be
//! represented (a span without ids, a log without a body, a data point without a
//! value) are counted in `Batch::rejected` instead of failing the whole request.

use crate::models::{
    AttributeValue, Attributes, Batch, InvalidRecord, LogEntry, LogLevel, MetricKind, MetricPoint, Span,
    SpanEvent, SpanKind, SpanStatus, Temporality, TelemetryRecord,
};
use crate::otlp::proto;
use chrono::{DateTime, Utc};
use std::time::{Duration, UNIX_EPOCH};

/// Resource attribute holding the producing service name.
pub const SERVICE_NAME_KEY: &str = "service.name";

/// Service name used when neither the resource nor the scope names one.
pub const UNKNOWN_SERVICE: &str = "unknown_service";

/// Converts an OTLP timestamp (nanoseconds since epoch) to a `DateTime<Utc>`.
///
/// A zero timestamp means "not set" and maps to the current time.
fn timestamp_to_datetime(nanos: u64) -> DateTime<Utc> {
    if nanos == 0 {
        return Utc::now();
    }
    DateTime::<Utc>::from(UNIX_EPOCH + Duration::from_nanos(nanos))
}

/// Converts OTLP `AnyValue` to `serde_json::Value`.
fn any_value_to_json(value: &proto::common::v1::AnyValue) -> serde_json::Value {
    use proto::common::v1::any_value::Value;

    match &value.value {
        Some(Value::StringValue(s)) => serde_json::Value::String(s.clone()),
        Some(Value::BoolValue(b)) => serde_json::Value::Bool(*b),
        Some(Value::IntValue(i)) => serde_json::Value::Number((*i).into()),
        Some(Value::DoubleValue(d)) => serde_json::Number::from_f64(*d)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Some(Value::ArrayValue(arr)) => {
            serde_json::Value::Array(arr.values.iter().map(any_value_to_json).collect())
        }
        Some(Value::KvlistValue(kv)) => {
            let mut map = serde_json::Map::new();
            for pair in &kv.values {
                if let Some(ref v) = pair.value {
                    map.insert(pair.key.clone(), any_value_to_json(v));
                }
            }
            serde_json::Value::Object(map)
        }
        Some(Value::BytesValue(b)) => {
            use base64::Engine;
            serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
        None => serde_json::Value::Null,
    }
}

/// Converts OTLP `AnyValue` to a scalar attribute value.
///
/// Arrays and key-value lists are rendered as JSON text, bytes as base64.
#[must_use]
pub fn any_value_to_attribute(value: &proto::common::v1::AnyValue) -> Option<AttributeValue> {
    use proto::common::v1::any_value::Value;

    match &value.value {
        Some(Value::StringValue(s)) => Some(AttributeValue::String(s.clone())),
        Some(Value::BoolValue(b)) => Some(AttributeValue::Bool(*b)),
        Some(Value::IntValue(i)) => Some(AttributeValue::Int(*i)),
        Some(Value::DoubleValue(d)) => Some(AttributeValue::Double(*d)),
        Some(Value::BytesValue(_) | Value::ArrayValue(_) | Value::KvlistValue(_)) => match any_value_to_json(value) {
            serde_json::Value::String(s) => Some(AttributeValue::String(s)),
            other => Some(AttributeValue::String(other.to_string())),
        },
        None => None,
    }
}

/// Converts OTLP key-value pairs to an attribute map. Pairs without a value are skipped.
#[must_use]
pub fn key_values_to_attributes(attributes: &[proto::common::v1::KeyValue]) -> Attributes {
    attributes
        .iter()
        .filter_map(|kv| {
            kv.value
                .as_ref()
                .and_then(any_value_to_attribute)
                .map(|v| (kv.key.clone(), v))
        })
        .collect()
}

/// Extracts resource attributes from an OTLP resource.
#[must_use]
pub fn resource_attributes(resource: Option<&proto::resource::v1::Resource>) -> Attributes {
    resource
        .map(|r| key_values_to_attributes(&r.attributes))
        .unwrap_or_default()
}

/// Resolves the service name from resource attributes, falling back to the scope name.
fn resolve_service(resource_attrs: &Attributes, scope_name: &str) -> String {
    resource_attrs
        .get(SERVICE_NAME_KEY)
        .and_then(AttributeValue::as_str)
        .filter(|s| !s.is_empty())
        .or(Some(scope_name).filter(|s| !s.is_empty()))
        .unwrap_or(UNKNOWN_SERVICE)
        .to_string()
}

/// Copies resource attributes other than the service name into `attributes` under a `resource.` prefix.
fn merge_resource_attributes(attributes: &mut Attributes, resource_attrs: &Attributes) {
    for (key, value) in resource_attrs {
        if key != SERVICE_NAME_KEY {
            attributes.insert(format!("resource.{key}"), value.clone());
        }
    }
}

/// Encodes a correlation id, treating an empty id as absent.
fn optional_hex(id: &[u8]) -> Option<String> {
    if id.is_empty() {
        None
    } else {
        Some(hex::encode(id))
    }
}

/// Converts an OTLP severity number to `LogLevel`, using the severity text when the number is unset.
fn severity_to_log_level(severity: i32, severity_text: &str) -> LogLevel {
    // https://opentelemetry.io/docs/specs/otel/logs/data-model/#field-severitynumber
    match severity {
        1..=4 => LogLevel::Trace,
        5..=8 => LogLevel::Debug,
        9..=12 => LogLevel::Info,
        13..=16 => LogLevel::Warn,
        17..=20 => LogLevel::Error,
        21..=24 => LogLevel::Fatal,
        _ => LogLevel::from_severity_text(severity_text).unwrap_or_default(),
    }
}

/// Converts OTLP `LogRecord` to `LogEntry`.
///
/// # Arguments
///
/// * `log_record` - The OTLP log record
/// * `resource_attrs` - Attributes of the enclosing resource
/// * `scope_name` - The instrumentation scope name (service name fallback)
///
/// # Returns
///
/// A `LogEntry` if the record carries a non-empty body.
///
/// # Errors
///
/// Returns `InvalidRecord::EmptyBody` when the body is missing or empty.
pub fn otlp_log_to_log_entry(
    log_record: &proto::logs::v1::LogRecord,
    resource_attrs: &Attributes,
    scope_name: &str,
) -> Result<LogEntry, InvalidRecord> {
    let timestamp = if log_record.time_unix_nano > 0 {
        timestamp_to_datetime(log_record.time_unix_nano)
    } else {
        timestamp_to_datetime(log_record.observed_time_unix_nano)
    };

    let body = log_record
        .body
        .as_ref()
        .map(|body| match &body.value {
            Some(proto::common::v1::any_value::Value::StringValue(s)) => s.clone(),
            Some(_) => any_value_to_json(body).to_string(),
            None => String::new(),
        })
        .unwrap_or_default();

    let mut attributes = key_values_to_attributes(&log_record.attributes);
    merge_resource_attributes(&mut attributes, resource_attrs);

    let entry = LogEntry {
        timestamp,
        level: severity_to_log_level(log_record.severity_number, &log_record.severity_text),
        body,
        service: resolve_service(resource_attrs, scope_name),
        attributes,
        trace_id: optional_hex(&log_record.trace_id),
        span_id: optional_hex(&log_record.span_id),
    };
    entry.check()?;
    Ok(entry)
}

/// Converts OTLP span status to `SpanStatus`.
fn otlp_span_status_to_status(status: Option<&proto::trace::v1::Status>) -> SpanStatus {
    use proto::trace::v1::status::StatusCode;

    match status.map(|s| StatusCode::try_from(s.code)) {
        Some(Ok(StatusCode::Ok)) => SpanStatus::Ok,
        Some(Ok(StatusCode::Error)) => SpanStatus::Error,
        _ => SpanStatus::Unset,
    }
}

/// Converts OTLP span kind to `SpanKind`.
fn otlp_span_kind_to_kind(kind: i32) -> SpanKind {
    use proto::trace::v1::span::SpanKind as OtlpSpanKind;

    match OtlpSpanKind::try_from(kind) {
        Ok(OtlpSpanKind::Server) => SpanKind::Server,
        Ok(OtlpSpanKind::Client) => SpanKind::Client,
        Ok(OtlpSpanKind::Producer) => SpanKind::Producer,
        Ok(OtlpSpanKind::Consumer) => SpanKind::Consumer,
        _ => SpanKind::Internal,
    }
}

/// Converts OTLP `Span` to an internal `Span`.
///
/// # Errors
///
/// Returns the offending id when the trace id is not 16 bytes, the span id is
/// not 8 bytes, or a parent id is present with the wrong length.
pub fn otlp_span_to_span(
    otlp_span: &proto::trace::v1::Span,
    resource_attrs: &Attributes,
    scope_name: &str,
) -> Result<Span, InvalidRecord> {
    let name = if otlp_span.name.is_empty() {
        "unknown".to_string()
    } else {
        otlp_span.name.clone()
    };

    let status_message = otlp_span
        .status
        .as_ref()
        .map(|s| s.message.clone())
        .filter(|m| !m.is_empty());

    let mut attributes = key_values_to_attributes(&otlp_span.attributes);
    merge_resource_attributes(&mut attributes, resource_attrs);

    let events = otlp_span
        .events
        .iter()
        .map(|e| SpanEvent {
            name: e.name.clone(),
            timestamp: timestamp_to_datetime(e.time_unix_nano),
            attributes: key_values_to_attributes(&e.attributes),
        })
        .collect();

    let start_time = timestamp_to_datetime(otlp_span.start_time_unix_nano);
    let end_time = if otlp_span.end_time_unix_nano == 0 {
        start_time
    } else {
        timestamp_to_datetime(otlp_span.end_time_unix_nano)
    };

    let span = Span {
        trace_id: hex::encode(&otlp_span.trace_id),
        span_id: hex::encode(&otlp_span.span_id),
        parent_span_id: optional_hex(&otlp_span.parent_span_id),
        name,
        service: resolve_service(resource_attrs, scope_name),
        kind: otlp_span_kind_to_kind(otlp_span.kind),
        status: otlp_span_status_to_status(otlp_span.status.as_ref()),
        status_message,
        start_time,
        end_time,
        attributes,
        events,
    };
    span.check()?;
    Ok(span)
}

/// Converts an OTLP aggregation temporality to `Temporality`. Unspecified is treated as cumulative.
fn otlp_temporality(temporality: i32) -> Temporality {
    use proto::metrics::v1::AggregationTemporality;

    match AggregationTemporality::try_from(temporality) {
        Ok(AggregationTemporality::Delta) => Temporality::Delta,
        _ => Temporality::Cumulative,
    }
}

/// Metadata shared by every point produced from one OTLP metric.
struct PointTemplate<'a> {
    service: &'a str,
    unit: &'a str,
    description: &'a str,
}

impl PointTemplate<'_> {
    fn point(
        &self,
        name: &str,
        kind: MetricKind,
        value: f64,
        temporality: Temporality,
        time_unix_nano: u64,
        attributes: Attributes,
    ) -> MetricPoint {
        let mut point = MetricPoint::new(name, kind, value, self.service)
            .with_temporality(temporality)
            .with_timestamp(timestamp_to_datetime(time_unix_nano));
        point.attributes = attributes;
        if !self.unit.is_empty() {
            point = point.with_unit(self.unit);
        }
        if !self.description.is_empty() {
            point = point.with_description(self.description);
        }
        point
    }
}

/// Converts OTLP number data points to metric points. Points without a value are rejected.
fn number_points(
    template: &PointTemplate<'_>,
    name: &str,
    kind: MetricKind,
    temporality: Temporality,
    data_points: &[proto::metrics::v1::NumberDataPoint],
    out: &mut Vec<MetricPoint>,
) -> u64 {
    use proto::metrics::v1::number_data_point::Value;

    let mut rejected = 0;
    for data_point in data_points {
        #[allow(clippy::cast_precision_loss)]
        let value = match data_point.value {
            Some(Value::AsDouble(d)) => d,
            Some(Value::AsInt(i)) => i as f64,
            None => {
                rejected += 1;
                continue;
            }
        };
        out.push(template.point(
            name,
            kind,
            value,
            temporality,
            data_point.time_unix_nano,
            key_values_to_attributes(&data_point.attributes),
        ));
    }
    rejected
}

/// Flattens OTLP histogram data points into `_bucket`, `_sum` and `_count` points.
///
/// Bucket points carry a cumulative count and an `le` attribute, ending with `+Inf`.
/// Counts beyond `explicit_bounds.len() + 1` are folded into the `+Inf` bucket.
#[allow(clippy::cast_precision_loss)]
fn histogram_points(
    template: &PointTemplate<'_>,
    name: &str,
    temporality: Temporality,
    data_points: &[proto::metrics::v1::HistogramDataPoint],
    out: &mut Vec<MetricPoint>,
) {
    for data_point in data_points {
        let attributes = key_values_to_attributes(&data_point.attributes);
        let time = data_point.time_unix_nano;

        let bounds = &data_point.explicit_bounds;
        let mut cumulative = 0u64;
        let mut bucket = |le: String, cumulative: u64| {
            let mut bucket_attrs = attributes.clone();
            bucket_attrs.insert("le".to_string(), AttributeValue::String(le));
            out.push(template.point(
                &format!("{name}_bucket"),
                MetricKind::Counter,
                cumulative as f64,
                temporality,
                time,
                bucket_attrs,
            ));
        };
        for (i, count) in data_point.bucket_counts.iter().enumerate() {
            cumulative = cumulative.saturating_add(*count);
            if let Some(bound) = bounds.get(i) {
                bucket(bound.to_string(), cumulative);
            }
        }
        if data_point.bucket_counts.len() > bounds.len() {
            bucket("+Inf".to_string(), cumulative);
        }

        if let Some(sum) = data_point.sum {
            out.push(template.point(
                &format!("{name}_sum"),
                MetricKind::Counter,
                sum,
                temporality,
                time,
                attributes.clone(),
            ));
        }
        out.push(template.point(
            &format!("{name}_count"),
            MetricKind::Counter,
            data_point.count as f64,
            temporality,
            time,
            attributes,
        ));
    }
}

/// Number of data points carried by a metric, whatever its type.
fn data_point_count(data: Option<&proto::metrics::v1::metric::Data>) -> u64 {
    use proto::metrics::v1::metric::Data;

    let count = match data {
        Some(Data::Gauge(gauge)) => gauge.data_points.len(),
        Some(Data::Sum(sum)) => sum.data_points.len(),
        Some(Data::Histogram(histogram)) => histogram.data_points.len(),
        Some(Data::ExponentialHistogram(histogram)) => histogram.data_points.len(),
        Some(Data::Summary(summary)) => summary.data_points.len(),
        None => 0,
    };
    count as u64
}

/// Converts an OTLP metric into metric points.
///
/// Returns the converted points and the number of data points that were rejected.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn otlp_metric_to_points(
    otlp_metric: &proto::metrics::v1::Metric,
    resource_attrs: &Attributes,
    scope_name: &str,
) -> (Vec<MetricPoint>, u64) {
    use proto::metrics::v1::metric::Data;

    let service = resolve_service(resource_attrs, scope_name);
    let template = PointTemplate {
        service: &service,
        unit: &otlp_metric.unit,
        description: &otlp_metric.description,
    };
    let name = otlp_metric.name.as_str();
    if name.is_empty() {
        let rejected = data_point_count(otlp_metric.data.as_ref());
        tracing::debug!(rejected, "{}", InvalidRecord::EmptyMetricName);
        return (Vec::new(), rejected);
    }
    let mut points = Vec::new();
    let mut rejected = 0;

    match &otlp_metric.data {
        Some(Data::Gauge(gauge)) => {
            rejected += number_points(
                &template,
                name,
                MetricKind::Gauge,
                Temporality::Cumulative,
                &gauge.data_points,
                &mut points,
            );
        }
        Some(Data::Sum(sum)) => {
            let kind = if sum.is_monotonic {
                MetricKind::Counter
            } else {
                MetricKind::UpDownCounter
            };
            rejected += number_points(
                &template,
                name,
                kind,
                otlp_temporality(sum.aggregation_temporality),
                &sum.data_points,
                &mut points,
            );
        }
        Some(Data::Histogram(histogram)) => {
            histogram_points(
                &template,
                name,
                otlp_temporality(histogram.aggregation_temporality),
                &histogram.data_points,
                &mut points,
            );
        }
        Some(Data::ExponentialHistogram(histogram)) => {
            // Buckets are not mapped; sum and count still carry the useful signal.
            let temporality = otlp_temporality(histogram.aggregation_temporality);
            for data_point in &histogram.data_points {
                let attributes = key_values_to_attributes(&data_point.attributes);
                if let Some(sum) = data_point.sum {
                    points.push(template.point(
                        &format!("{name}_sum"),
                        MetricKind::Counter,
                        sum,
                        temporality,
                        data_point.time_unix_nano,
                        attributes.clone(),
                    ));
                }
                points.push(template.point(
                    &format!("{name}_count"),
                    MetricKind::Counter,
                    data_point.count as f64,
                    temporality,
                    data_point.time_unix_nano,
                    attributes,
                ));
            }
        }
        Some(Data::Summary(summary)) => {
            for data_point in &summary.data_points {
                let attributes = key_values_to_attributes(&data_point.attributes);
                for quantile in &data_point.quantile_values {
                    let mut quantile_attrs = attributes.clone();
                    quantile_attrs.insert(
                        "quantile".to_string(),
                        AttributeValue::String(quantile.quantile.to_string()),
                    );
                    points.push(template.point(
                        name,
                        MetricKind::Gauge,
                        quantile.value,
                        Temporality::Cumulative,
                        data_point.time_unix_nano,
                        quantile_attrs,
                    ));
                }
                points.push(template.point(
                    &format!("{name}_sum"),
                    MetricKind::Counter,
                    data_point.sum,
                    Temporality::Cumulative,
                    data_point.time_unix_nano,
                    attributes.clone(),
                ));
                points.push(template.point(
                    &format!("{name}_count"),
                    MetricKind::Counter,
                    data_point.count as f64,
                    Temporality::Cumulative,
                    data_point.time_unix_nano,
                    attributes,
                ));
            }
        }
        None => {
            tracing::debug!(metric = %name, "Metric without data ignored");
        }
    }

    (points, rejected)
}

/// Converts an OTLP trace export request into a batch of spans.
#[must_use]
pub fn traces_request_to_batch(
    request: &proto::collector::trace::v1::ExportTraceServiceRequest,
) -> Batch {
    let mut batch = Batch::default();

    for resource_spans in &request.resource_spans {
        let resource_attrs = resource_attributes(resource_spans.resource.as_ref());

        for scope_spans in &resource_spans.scope_spans {
            let scope_name = scope_spans.scope.as_ref().map_or("", |s| s.name.as_str());

            for span in &scope_spans.spans {
                match otlp_span_to_span(span, &resource_attrs, scope_name) {
                    Ok(span) => batch.records.push(TelemetryRecord::Span(span)),
                    Err(e) => {
                        tracing::debug!(error = %e, "Span rejected");
                        batch.rejected += 1;
                    }
                }
            }
        }
    }

    batch
}

/// Converts an OTLP metrics export request into a batch of metric points.
#[must_use]
pub fn metrics_request_to_batch(
    request: &proto::collector::metrics::v1::ExportMetricsServiceRequest,
) -> Batch {
    let mut batch = Batch::default();

    for resource_metrics in &request.resource_metrics {
        let resource_attrs = resource_attributes(resource_metrics.resource.as_ref());

        for scope_metrics in &resource_metrics.scope_metrics {
            let scope_name = scope_metrics.scope.as_ref().map_or("", |s| s.name.as_str());

            for metric in &scope_metrics.metrics {
                let (points, rejected) = otlp_metric_to_points(metric, &resource_attrs, scope_name);
                batch
                    .records
                    .extend(points.into_iter().map(TelemetryRecord::Metric));
                batch.rejected += rejected;
            }
        }
    }

    batch
}

/// Converts an OTLP logs export request into a batch of log entries.
#[must_use]
pub fn logs_request_to_batch(
    request: &proto::collector::logs::v1::ExportLogsServiceRequest,
) -> Batch {
    let mut batch = Batch::default();

    for resource_logs in &request.resource_logs {
        let resource_attrs = resource_attributes(resource_logs.resource.as_ref());

        for scope_logs in &resource_logs.scope_logs {
            let scope_name = scope_logs.scope.as_ref().map_or("", |s| s.name.as_str());

            for log_record in &scope_logs.log_records {
                match otlp_log_to_log_entry(log_record, &resource_attrs, scope_name) {
                    Ok(entry) => batch.records.push(TelemetryRecord::Log(entry)),
                    Err(e) => {
                        tracing::debug!(error = %e, "Log record rejected");
                        batch.rejected += 1;
                    }
                }
            }
        }
    }

    batch
}


#[cfg(test)]
#[path = "conversions_test.rs"]
mod conversions_test;
