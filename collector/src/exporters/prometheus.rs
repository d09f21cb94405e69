//! Prometheus exporter.
//!
//! Keeps the latest value of every series (metric name plus label set) and serves
//! them on `GET /metrics` in text exposition format 0.0.4 from its own listener.

use super::ExportError;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use shared::config::PrometheusSettings;
use shared::models::{Batch, MetricKind, MetricPoint, SignalKind, Temporality};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Content type of the text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Label carrying the producing service.
const JOB_LABEL: &str = "job";

/// Replaces characters that are not valid in a metric name.
#[must_use]
pub fn sanitize_metric_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Replaces characters that are not valid in a label name.
#[must_use]
pub fn sanitize_label_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', r"\\")
        .replace('"', r#"\""#)
        .replace('\n', r"\n")
}

fn escape_help(help: &str) -> String {
    help.replace('\\', r"\\").replace('\n', r"\n")
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() { "+Inf" } else { "-Inf" }.to_string()
    } else {
        value.to_string()
    }
}

const COMPONENT_SUFFIXES: [&str; 4] = ["_total", "_bucket", "_sum", "_count"];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SeriesKey {
    name: String,
    labels: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct Series {
    family_type: &'static str,
    help: Option<String>,
    value: f64,
    updated: Instant,
}

/// Latest value per series, shared between the exporter and its scrape handler.
#[derive(Debug)]
struct SeriesCache {
    series: Mutex<BTreeMap<SeriesKey, Series>>,
    expiration: Duration,
}

impl SeriesCache {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<SeriesKey, Series>> {
        self.series.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn expire(series: &mut BTreeMap<SeriesKey, Series>, expiration: Duration, now: Instant) {
        series.retain(|_, s| now.saturating_duration_since(s.updated) < expiration);
    }

    fn len(&self) -> usize {
        let mut series = self.lock();
        Self::expire(&mut series, self.expiration, Instant::now());
        series.len()
    }

    fn render(&self) -> String {
        let mut series = self.lock();
        Self::expire(&mut series, self.expiration, Instant::now());

        let mut out = String::new();
        let mut current_family: Option<&str> = None;
        for (key, s) in series.iter() {
            if current_family != Some(key.name.as_str()) {
                if let Some(help) = &s.help {
                    let _ = writeln!(out, "# HELP {} {}", key.name, escape_help(help));
                }
                let _ = writeln!(out, "# TYPE {} {}", key.name, s.family_type);
                current_family = Some(key.name.as_str());
            }

            out.push_str(&key.name);
            if !key.labels.is_empty() {
                out.push('{');
                for (i, (name, value)) in key.labels.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let _ = write!(out, "{name}=\"{}\"", escape_label_value(value));
                }
                out.push('}');
            }
            let _ = writeln!(out, " {}", format_value(s.value));
        }
        out
    }
}

/// Exposes metric batches for scraping.
#[derive(Debug)]
pub struct PrometheusExporter {
    id: String,
    endpoint: String,
    namespace: Option<String>,
    const_labels: BTreeMap<String, String>,
    cache: Arc<SeriesCache>,
    local_addr: Mutex<Option<SocketAddr>>,
    shutdown_tx: watch::Sender<bool>,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl PrometheusExporter {
    /// Creates a Prometheus exporter. The listener is not bound until [`Self::start`].
    #[must_use]
    pub fn new(id: impl Into<String>, settings: &PrometheusSettings) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            id: id.into(),
            endpoint: settings.endpoint.clone(),
            namespace: settings
                .namespace
                .as_deref()
                .filter(|ns| !ns.is_empty())
                .map(sanitize_metric_name),
            const_labels: settings
                .const_labels
                .iter()
                .map(|(k, v)| (sanitize_label_name(k), v.clone()))
                .collect(),
            cache: Arc::new(SeriesCache {
                series: Mutex::new(BTreeMap::new()),
                expiration: settings.metric_expiration(),
            }),
            local_addr: Mutex::new(None),
            shutdown_tx,
            server: Mutex::new(None),
        }
    }

    /// Binds the scrape listener and starts serving `GET /metrics`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be bound.
    pub async fn start(&self) -> Result<SocketAddr, ExportError> {
        let listener = TcpListener::bind(&self.endpoint)
            .await
            .map_err(|source| ExportError::Bind {
                endpoint: self.endpoint.clone(),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| ExportError::Bind {
            endpoint: self.endpoint.clone(),
            source,
        })?;

        let app = Router::new()
            .route("/metrics", get(scrape))
            .with_state(Arc::clone(&self.cache));
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let id = self.id.clone();
        let handle = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(exporter = %id, error = %e, "Prometheus scrape server failed");
            }
        });

        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(addr);
        *self.server.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        tracing::info!(exporter = %self.id, %addr, "Prometheus scrape endpoint listening");
        Ok(addr)
    }

    /// Address of the scrape listener once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stops the scrape listener.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handle = self
            .server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn series_name(&self, point: &MetricPoint) -> String {
        let mut name = sanitize_metric_name(&point.name);
        if let Some(ns) = &self.namespace {
            name = format!("{ns}_{name}");
        }
        if point.kind == MetricKind::Counter
            && !COMPONENT_SUFFIXES.iter().any(|s| name.ends_with(s))
        {
            name.push_str("_total");
        }
        name
    }

    fn series_labels(&self, point: &MetricPoint) -> Vec<(String, String)> {
        let mut labels: BTreeMap<String, String> = point
            .attributes
            .iter()
            .map(|(k, v)| (sanitize_label_name(k), v.to_string()))
            .collect();
        for (k, v) in &self.const_labels {
            labels.entry(k.clone()).or_insert_with(|| v.clone());
        }
        labels
            .entry(JOB_LABEL.to_string())
            .or_insert_with(|| point.service.clone());
        labels.into_iter().collect()
    }

    /// Applies a batch to the series cache.
    ///
    /// Cumulative points replace the cached value; delta points are added to it.
    ///
    /// # Errors
    ///
    /// Returns an error for non-metric batches.
    pub fn export(&self, kind: SignalKind, batch: &Batch) -> Result<(), ExportError> {
        if kind != SignalKind::Metrics {
            return Err(ExportError::Unsupported {
                exporter: "prometheus",
                signal: kind,
            });
        }

        let now = Instant::now();
        let mut series = self.cache.lock();
        for point in batch.metric_points() {
            let key = SeriesKey {
                name: self.series_name(point),
                labels: self.series_labels(point),
            };
            let family_type = point.kind.prometheus_type();
            let entry = series.entry(key).or_insert_with(|| Series {
                family_type,
                help: None,
                value: 0.0,
                updated: now,
            });

            entry.value = match point.temporality {
                Temporality::Delta => entry.value + point.value,
                Temporality::Cumulative => point.value,
            };
            entry.family_type = family_type;
            entry.help.clone_from(&point.description);
            entry.updated = now;
        }
        SeriesCache::expire(&mut series, self.cache.expiration, now);
        tracing::debug!(exporter = %self.id, series = series.len(), "Updated Prometheus series");
        Ok(())
    }

    /// Number of live series.
    #[must_use]
    pub fn series_count(&self) -> usize {
        self.cache.len()
    }

    /// Renders the current exposition text.
    #[must_use]
    pub fn render(&self) -> String {
        self.cache.render()
    }
}

async fn scrape(State(cache): State<Arc<SeriesCache>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        cache.render(),
    )
}
