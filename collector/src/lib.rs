//! Telepipe Collector
//!
//! This crate runs the Telepipe telemetry pipeline: OTLP receivers accept traces,
//! metrics and logs over gRPC and HTTP, a per-signal router fans every batch out to
//! the exporters of its pipeline, and each exporter delivers to its sink with
//! retries and a bounded queue.
//!
//! # Architecture
//!
//! - [`receiver`] decodes export requests into batches
//! - [`pipeline`] routes batches onto per-exporter queues
//! - [`exporters`] owns the live exporters and their delivery workers
//! - [`metrics`] counts what is received, delivered and dropped
//!
//! # Example
//!
//! ```no_run
//! use collector::run_collector;
//! use shared::config::CollectorConfig;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CollectorConfig::from_file("config/collector.yaml")?;
//!     run_collector(config, Duration::from_secs(10)).await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod config;
pub mod exporters;
mod grpc;
pub mod metrics;
pub mod pipeline;
pub mod receiver;
mod routes;
mod state;

pub use config::{Settings, DEFAULT_CONFIG_PATH, DEFAULT_SHUTDOWN_GRACE_SECS};
pub use routes::{
    ErrorResponse, ExportResponse, HealthResponse, OtlpError, PartialSuccess, RetainedRecords,
};
pub use state::AppState;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::Router;
use exporters::{Exporters, ShutdownTimeout};
use grpc::{LogsServiceImpl, MetricsServiceImpl, TracesServiceImpl};
use metrics::{Stats, StatsSnapshot};
use pipeline::PipelineRouter;
use receiver::Receiver;
use shared::config::{CollectorConfig, ReceiverConfig};
use shared::otlp::proto::collector::{
    logs::v1::logs_service_server::LogsServiceServer,
    metrics::v1::metrics_service_server::MetricsServiceServer,
    trace::v1::trace_service_server::TraceServiceServer,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Runs the collector until SIGTERM/SIGINT, then shuts it down gracefully.
///
/// # Errors
///
/// Returns an error if an exporter or listener fails to start.
pub async fn run_collector(config: CollectorConfig, grace: Duration) -> Result<()> {
    let collector = Collector::start(&config).await?;

    tracing::info!(
        receivers = collector.http_addrs.len() + collector.grpc_addrs.len(),
        exporters = collector.exporters.ids().count(),
        "Telepipe collector running"
    );

    shutdown_signal().await;

    // The timeout is already logged as a warning; it is not a failed run.
    let _ = collector.shutdown(grace).await;
    tracing::info!("Collector shutdown complete");
    Ok(())
}

/// Creates the HTTP router for one receiver with all routes and middleware.
///
/// Bodies larger than `max_body_bytes` are rejected with 413.
pub fn create_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .merge(routes::health_routes(state.clone()))
        .merge(routes::otlp_routes(state.clone()))
        .merge(routes::internal_routes(state))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

/// A running collector: exporters, router and receiver listeners.
#[derive(Debug)]
pub struct Collector {
    exporters: Arc<Exporters>,
    stats: Arc<Stats>,
    http_addrs: BTreeMap<String, SocketAddr>,
    grpc_addrs: BTreeMap<String, SocketAddr>,
    shutdown_tx: watch::Sender<bool>,
    servers: JoinSet<()>,
}

/// A receiver listener bound but not yet serving.
enum Listener {
    Http {
        listener: TcpListener,
        addr: SocketAddr,
        max_body_bytes: usize,
    },
    Grpc {
        listener: TcpListener,
        addr: SocketAddr,
    },
}

/// Binds an endpoint and reads back the bound address, so that nothing after
/// this step can fail.
async fn bind(
    receiver_id: &str,
    protocol: &str,
    endpoint: &str,
) -> Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(endpoint).await.with_context(|| {
        format!("receiver '{receiver_id}' failed to bind {protocol} endpoint {endpoint}")
    })?;
    let addr = listener.local_addr().with_context(|| {
        format!("receiver '{receiver_id}' has no local address for {protocol} endpoint {endpoint}")
    })?;
    Ok((listener, addr))
}

async fn bind_receivers(
    config: &CollectorConfig,
    router: &PipelineRouter,
) -> Result<Vec<(String, Listener)>> {
    let mut listeners = Vec::new();
    for (id, receiver_config) in &config.receivers {
        if router.signals_for_receiver(id).is_empty() {
            tracing::info!(receiver = %id, "Receiver not used by any pipeline, skipping");
            continue;
        }
        let ReceiverConfig::Otlp(settings) = receiver_config;
        if let Some(grpc) = &settings.protocols.grpc {
            let (listener, addr) = bind(id, "gRPC", &grpc.endpoint).await?;
            listeners.push((id.clone(), Listener::Grpc { listener, addr }));
        }
        if let Some(http) = &settings.protocols.http {
            let (listener, addr) = bind(id, "HTTP", &http.endpoint).await?;
            listeners.push((
                id.clone(),
                Listener::Http {
                    listener,
                    addr,
                    max_body_bytes: http.max_body_bytes,
                },
            ));
        }
    }
    Ok(listeners)
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    // A dropped sender also means shutdown.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

impl Collector {
    /// Starts exporters, then binds and serves every receiver listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if an exporter cannot start or a listener cannot bind.
    /// Anything started before the failure is shut down again.
    pub async fn start(config: &CollectorConfig) -> Result<Self> {
        let exporters = Arc::new(
            Exporters::start(config)
                .await
                .context("failed to start exporters")?,
        );
        let stats = Arc::new(Stats::new());
        let router = Arc::new(PipelineRouter::new(config, &exporters, Arc::clone(&stats)));

        let listeners = match bind_receivers(config, &router).await {
            Ok(listeners) => listeners,
            Err(e) => {
                // Nothing was queued yet, so there is nothing to drain.
                let _ = exporters.shutdown(Duration::ZERO).await;
                return Err(e);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut servers = JoinSet::new();
        let mut http_addrs = BTreeMap::new();
        let mut grpc_addrs = BTreeMap::new();

        for (id, listener) in listeners {
            let receiver = Receiver::new(&id, Arc::clone(&router), Arc::clone(&stats));
            match listener {
                Listener::Http {
                    listener,
                    addr,
                    max_body_bytes,
                } => {
                    let app = create_router(
                        AppState::new(receiver, Arc::clone(&exporters)),
                        max_body_bytes,
                    );
                    let shutdown = wait_for_shutdown(shutdown_rx.clone());
                    tracing::info!(receiver = %id, %addr, "OTLP/HTTP receiver listening");
                    servers.spawn(async move {
                        if let Err(e) = axum::serve(listener, app)
                            .with_graceful_shutdown(shutdown)
                            .await
                        {
                            tracing::error!(%addr, error = %e, "OTLP/HTTP server failed");
                        }
                    });
                    http_addrs.insert(id, addr);
                }
                Listener::Grpc { listener, addr } => {
                    let shutdown = wait_for_shutdown(shutdown_rx.clone());
                    let server = tonic::transport::Server::builder()
                        .add_service(TraceServiceServer::new(TracesServiceImpl::new(
                            receiver.clone(),
                        )))
                        .add_service(MetricsServiceServer::new(MetricsServiceImpl::new(
                            receiver.clone(),
                        )))
                        .add_service(LogsServiceServer::new(LogsServiceImpl::new(receiver)));
                    tracing::info!(receiver = %id, %addr, "OTLP/gRPC receiver listening");
                    servers.spawn(async move {
                        let incoming = tonic::transport::server::TcpIncoming::from(listener);
                        if let Err(e) = server
                            .serve_with_incoming_shutdown(incoming, shutdown)
                            .await
                        {
                            tracing::error!(%addr, error = %e, "OTLP/gRPC server failed");
                        }
                    });
                    grpc_addrs.insert(id, addr);
                }
            }
        }

        Ok(Self {
            exporters,
            stats,
            http_addrs,
            grpc_addrs,
            shutdown_tx,
            servers,
        })
    }

    /// Bound address of a receiver's HTTP listener.
    #[must_use]
    pub fn http_addr(&self, receiver_id: &str) -> Option<SocketAddr> {
        self.http_addrs.get(receiver_id).copied()
    }

    /// Bound address of a receiver's gRPC listener.
    #[must_use]
    pub fn grpc_addr(&self, receiver_id: &str) -> Option<SocketAddr> {
        self.grpc_addrs.get(receiver_id).copied()
    }

    /// Live exporters.
    #[must_use]
    pub fn exporters(&self) -> &Exporters {
        &self.exporters
    }

    /// Ingestion and delivery counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.exporters.stats())
    }

    /// Stops the receivers, then drains exporter queues. Both steps share one
    /// `grace` budget: time spent waiting for receivers is not available for
    /// draining.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownTimeout`] if exporters did not drain in time. It is also
    /// logged as a warning.
    pub async fn shutdown(mut self, grace: Duration) -> Result<(), ShutdownTimeout> {
        let deadline = tokio::time::Instant::now() + grace;
        tracing::info!("Stopping receivers");
        let _ = self.shutdown_tx.send(true);

        let stopped = tokio::time::timeout_at(deadline, async {
            while self.servers.join_next().await.is_some() {}
        })
        .await;
        if stopped.is_err() {
            tracing::warn!("Receivers did not stop in time, closing open connections");
            self.servers.shutdown().await;
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        tracing::info!(
            remaining_secs = remaining.as_secs_f64(),
            "Draining exporter queues"
        );
        let result = self.exporters.shutdown(remaining).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Exporters did not drain before the deadline");
        }
        result
    }
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
