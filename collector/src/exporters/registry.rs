//! Live exporter instances and their delivery workers.
//!
//! `Exporters` is built once at startup from the configuration. For every
//! (exporter, signal) pair wired into a pipeline it owns a bounded queue and a
//! worker task that drains it, retrying transient failures with backoff.

use super::{ExportError, Exporter, RetryPolicy};
use crate::metrics::{DestinationCounters, DestinationStats};
use crate::pipeline::queue::{BatchQueue, PushOutcome};
use shared::config::{CollectorConfig, ExporterConfig};
use shared::models::{Batch, SignalKind, TelemetryRecord};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;

/// Workers that were still running when the shutdown grace period ran out.
#[derive(Debug, Error)]
#[error("{pending} exporter worker(s) did not drain within {grace:?}")]
pub struct ShutdownTimeout {
    /// Number of aborted workers.
    pub pending: usize,
    /// The grace period that elapsed.
    pub grace: Duration,
}

/// The queue and counters for one (exporter, signal) pair.
#[derive(Debug)]
pub struct Destination {
    exporter_id: String,
    kind: SignalKind,
    queue: BatchQueue,
    counters: DestinationCounters,
    /// Record count of the batch the worker is exporting right now.
    in_flight: Mutex<Option<usize>>,
}

impl Destination {
    fn new(exporter_id: &str, kind: SignalKind, queue_size: usize) -> Self {
        Self {
            exporter_id: exporter_id.to_string(),
            kind,
            queue: BatchQueue::new(queue_size),
            counters: DestinationCounters::default(),
            in_flight: Mutex::new(None),
        }
    }

    fn set_in_flight(&self, records: Option<usize>) -> Option<usize> {
        std::mem::replace(
            &mut *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner),
            records,
        )
    }

    /// Exporter id.
    #[must_use]
    pub fn exporter_id(&self) -> &str {
        &self.exporter_id
    }

    /// Signal kind.
    #[must_use]
    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    /// Hands a batch to the worker without waiting.
    ///
    /// Returns false if the destination is shut down; the batch is counted as dropped.
    pub fn enqueue(&self, batch: Batch) -> bool {
        match self.queue.push(batch) {
            PushOutcome::Queued => true,
            PushOutcome::Evicted(oldest) => {
                self.counters.record_dropped(oldest.len());
                tracing::warn!(
                    exporter = %self.exporter_id,
                    signal = %self.kind,
                    records = oldest.len(),
                    "Queue full, dropped oldest batch"
                );
                true
            }
            PushOutcome::Closed(batch) => {
                self.counters.record_dropped(batch.len());
                false
            }
        }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> DestinationStats {
        self.counters.snapshot(self.queue.len())
    }
}

/// Process-scoped registry of live exporters.
#[derive(Debug)]
pub struct Exporters {
    instances: BTreeMap<String, Arc<Exporter>>,
    destinations: BTreeMap<(String, SignalKind), Arc<Destination>>,
    workers: Mutex<JoinSet<()>>,
}

impl Exporters {
    /// Creates and starts every exporter referenced by a pipeline.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if an exporter cannot be created or started. Exporters
    /// started before the failure are shut down again.
    pub async fn start(config: &CollectorConfig) -> Result<Self, ExportError> {
        let mut instances: BTreeMap<String, Arc<Exporter>> = BTreeMap::new();

        for (id, exporter_config) in &config.exporters {
            if config.signals_for_exporter(id).is_empty() {
                tracing::info!(exporter = %id, "Exporter not used by any pipeline, skipping");
                continue;
            }
            match start_exporter(id, exporter_config).await {
                Ok(exporter) => {
                    instances.insert(id.clone(), Arc::new(exporter));
                }
                Err(e) => {
                    for started in instances.values() {
                        started.shutdown().await;
                    }
                    return Err(e);
                }
            }
        }

        let mut destinations = BTreeMap::new();
        let mut workers = JoinSet::new();
        for (id, exporter) in &instances {
            let common = config.exporters[id].common();
            let policy = RetryPolicy::from_settings(&common.retry_on_failure);

            for kind in config.signals_for_exporter(id) {
                let destination = Arc::new(Destination::new(
                    id,
                    kind,
                    common.sending_queue.queue_size,
                ));
                workers.spawn(run_worker(
                    Arc::clone(exporter),
                    Arc::clone(&destination),
                    policy.clone(),
                ));
                destinations.insert((id.clone(), kind), destination);
            }

            tracing::info!(
                exporter = %id,
                kind = exporter.type_name(),
                signals = ?config.signals_for_exporter(id),
                "Exporter started"
            );
        }

        Ok(Self {
            instances,
            destinations,
            workers: Mutex::new(workers),
        })
    }

    /// Returns the destination for an exporter and signal, if that pair is wired.
    #[must_use]
    pub fn destination(&self, exporter_id: &str, kind: SignalKind) -> Option<Arc<Destination>> {
        self.destinations
            .get(&(exporter_id.to_string(), kind))
            .cloned()
    }

    /// Returns a live exporter by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Exporter> {
        self.instances.get(id).map(AsRef::as_ref)
    }

    /// Ids of the live exporters, in id order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.instances.keys().map(String::as_str)
    }

    /// Records retained by a debug exporter, or `None` if `id` is not a debug exporter.
    #[must_use]
    pub fn debug_records(&self, id: &str) -> Option<Vec<TelemetryRecord>> {
        match self.get(id)? {
            Exporter::Debug(exporter) => Some(exporter.retained()),
            _ => None,
        }
    }

    /// Scrape address of a Prometheus exporter.
    #[must_use]
    pub fn prometheus_addr(&self, id: &str) -> Option<SocketAddr> {
        match self.get(id)? {
            Exporter::Prometheus(exporter) => exporter.local_addr(),
            _ => None,
        }
    }

    /// Delivery counters per exporter and signal.
    #[must_use]
    pub fn stats(&self) -> BTreeMap<String, BTreeMap<SignalKind, DestinationStats>> {
        let mut stats: BTreeMap<String, BTreeMap<SignalKind, DestinationStats>> = BTreeMap::new();
        for ((id, kind), destination) in &self.destinations {
            stats
                .entry(id.clone())
                .or_default()
                .insert(*kind, destination.stats());
        }
        stats
    }

    /// Closes every queue and waits up to `grace` for workers to drain.
    ///
    /// Workers still running afterwards are aborted. Their in-flight and queued
    /// batches are counted as dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownTimeout`] if any worker had to be aborted.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), ShutdownTimeout> {
        for destination in self.destinations.values() {
            destination.queue.close();
        }

        let mut workers =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = workers.join_next().await {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Exporter worker panicked");
                }
            }
        })
        .await;

        let result = if drained.is_ok() {
            Ok(())
        } else {
            let pending = workers.len();
            workers.abort_all();
            while workers.join_next().await.is_some() {}

            for destination in self.destinations.values() {
                if let Some(records) = destination.set_in_flight(None) {
                    destination.counters.record_dropped(records);
                }
                for batch in destination.queue.drain() {
                    destination.counters.record_dropped(batch.len());
                }
            }
            Err(ShutdownTimeout { pending, grace })
        };

        for exporter in self.instances.values() {
            exporter.shutdown().await;
        }
        result
    }
}

async fn start_exporter(id: &str, config: &ExporterConfig) -> Result<Exporter, ExportError> {
    let exporter = Exporter::from_config(id, config)?;
    exporter.start().await?;
    Ok(exporter)
}

async fn run_worker(exporter: Arc<Exporter>, destination: Arc<Destination>, policy: RetryPolicy) {
    let kind = destination.kind;
    while let Some(batch) = destination.queue.pop().await {
        let records = batch.len();
        destination.set_in_flight(Some(records));
        let exporter_ref: &Exporter = &exporter;
        let batch_ref = &batch;

        let result = policy
            .run(
                move || exporter_ref.export(kind, batch_ref),
                |retry, error| {
                    destination.counters.record_retry();
                    tracing::warn!(
                        exporter = %destination.exporter_id,
                        signal = %kind,
                        retry,
                        error = %error,
                        "Export failed, retrying"
                    );
                },
            )
            .await;

        destination.set_in_flight(None);
        match result {
            Ok(()) => destination.counters.record_sent(records),
            Err(error) => {
                destination.counters.record_failed(records);
                tracing::error!(
                    exporter = %destination.exporter_id,
                    signal = %kind,
                    records,
                    error = %error,
                    "Dropping batch after failed export"
                );
            }
        }
    }
    tracing::debug!(exporter = %destination.exporter_id, signal = %kind, "Exporter worker stopped");
}
