//! Metric points.
//!
//! A `MetricPoint` is the metric record variant: one numeric sample of one series.
//! Histograms arrive here already flattened into `_bucket`, `_sum` and `_count`
//! points.

use super::record::InvalidRecord;
use super::{AttributeValue, Attributes};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Instrument kind a point was produced by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Last value wins.
    #[default]
    Gauge,
    /// Monotonic sum, exposed as a Prometheus counter.
    Counter,
    /// Sum that may decrease, exposed as a gauge.
    UpDownCounter,
}

impl MetricKind {
    /// Name used in Prometheus `# TYPE` lines.
    #[must_use]
    pub fn prometheus_type(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge | Self::UpDownCounter => "gauge",
        }
    }
}

/// Aggregation temporality of a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Temporality {
    /// The value is the total since a fixed start time.
    #[default]
    Cumulative,
    /// The value is the change since the previous report.
    Delta,
}

impl std::fmt::Display for Temporality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cumulative => write!(f, "cumulative"),
            Self::Delta => write!(f, "delta"),
        }
    }
}

/// One sample of one series.
///
/// ```
/// use shared::models::{MetricKind, MetricPoint, Temporality};
///
/// let point = MetricPoint::counter("http_requests_total", 1234.0, "api")
///     .with_attribute("method", "GET")
///     .with_temporality(Temporality::Delta);
///
/// assert_eq!(point.kind.prometheus_type(), "counter");
/// assert!(point.check().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Metric name as sent, before any exporter sanitization.
    pub name: String,
    /// Instrument kind.
    #[serde(default)]
    pub kind: MetricKind,
    /// Sample value. Integer OTLP points are widened to `f64`.
    pub value: f64,
    /// Whether `value` is a running total or an increment.
    #[serde(default)]
    pub temporality: Temporality,
    /// Sample time.
    pub timestamp: DateTime<Utc>,
    /// Reporting service.
    pub service: String,
    /// Point attributes, which become series labels.
    #[serde(default)]
    pub attributes: Attributes,
    /// Metric description, used for `# HELP`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Metric unit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl MetricPoint {
    /// Creates a cumulative point timestamped now.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: MetricKind,
        value: f64,
        service: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
            temporality: Temporality::Cumulative,
            timestamp: Utc::now(),
            service: service.into(),
            attributes: Attributes::new(),
            description: None,
            unit: None,
        }
    }

    /// Shorthand for a gauge point.
    #[must_use]
    pub fn gauge(name: impl Into<String>, value: f64, service: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Gauge, value, service)
    }

    /// Shorthand for a monotonic counter point.
    #[must_use]
    pub fn counter(name: impl Into<String>, value: f64, service: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Counter, value, service)
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Sets the aggregation temporality.
    #[must_use]
    pub fn with_temporality(mut self, temporality: Temporality) -> Self {
        self.temporality = temporality;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the unit.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets the sample time.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Checks that the point names its metric.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidRecord::EmptyMetricName`] for an unnamed point.
    pub fn check(&self) -> Result<(), InvalidRecord> {
        if self.name.is_empty() {
            return Err(InvalidRecord::EmptyMetricName);
        }
        Ok(())
    }
}
