//! Per-signal pipeline router.
//!
//! Splits each received batch by signal kind and hands every part to the
//! destinations of the matching pipeline. Routing never waits for delivery.

use super::RouteSummary;
use crate::exporters::{Destination, Exporters};
use crate::metrics::Stats;
use shared::config::CollectorConfig;
use shared::models::{Batch, SignalKind};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug)]
struct Route {
    receivers: Vec<String>,
    destinations: Vec<Arc<Destination>>,
}

/// Routes batches from receivers to exporter queues.
#[derive(Debug)]
pub struct PipelineRouter {
    routes: BTreeMap<SignalKind, Route>,
    stats: Arc<Stats>,
}

impl PipelineRouter {
    /// Builds the routing table from the pipelines and the live exporters.
    ///
    /// Exporters listed by a pipeline but missing from `exporters` are skipped with an
    /// error log; configuration validation normally rules this out.
    #[must_use]
    pub fn new(config: &CollectorConfig, exporters: &Exporters, stats: Arc<Stats>) -> Self {
        let routes = config
            .pipelines
            .iter()
            .map(|(&kind, pipeline)| {
                let destinations = pipeline
                    .exporters
                    .iter()
                    .filter_map(|id| {
                        let destination = exporters.destination(id, kind);
                        if destination.is_none() {
                            tracing::error!(exporter = %id, signal = %kind, "Pipeline exporter is not running");
                        }
                        destination
                    })
                    .collect();
                (
                    kind,
                    Route {
                        receivers: pipeline.receivers.clone(),
                        destinations,
                    },
                )
            })
            .collect();

        Self { routes, stats }
    }

    /// Routes a batch received by `receiver_id`.
    ///
    /// Each per-signal part is enqueued once on every exporter of its pipeline, in
    /// pipeline order. Parts with no pipeline, or whose pipeline does not list the
    /// receiver, are refused and counted.
    pub fn route(&self, receiver_id: &str, batch: Batch) -> RouteSummary {
        let mut summary = RouteSummary::default();

        for (kind, part) in batch.partition() {
            let records = part.len();
            let Some(route) = self
                .routes
                .get(&kind)
                .filter(|r| r.receivers.iter().any(|id| id == receiver_id))
            else {
                self.stats.record_refused(kind, records);
                summary.refused += records;
                tracing::debug!(receiver = %receiver_id, signal = %kind, records, "No pipeline for records, refusing");
                continue;
            };

            self.stats.record_received(kind, records);
            summary.routed += records;

            if let Some((last, rest)) = route.destinations.split_last() {
                for destination in rest {
                    destination.enqueue(part.clone());
                }
                last.enqueue(part);
            }
        }
        summary
    }

    /// Signals that have a pipeline fed by `receiver_id`.
    #[must_use]
    pub fn signals_for_receiver(&self, receiver_id: &str) -> Vec<SignalKind> {
        self.routes
            .iter()
            .filter(|(_, r)| r.receivers.iter().any(|id| id == receiver_id))
            .map(|(&kind, _)| kind)
            .collect()
    }
}
