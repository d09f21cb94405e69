//! Application state module.
//!
//! Defines the state shared by the HTTP handlers of one receiver.

use crate::exporters::Exporters;
use crate::metrics::{Stats, StatsSnapshot};
use crate::receiver::Receiver;
use std::sync::Arc;

/// State passed to route handlers.
///
/// Cloned per request; everything inside is reference counted.
#[derive(Debug, Clone)]
pub struct AppState {
    receiver: Receiver,
    exporters: Arc<Exporters>,
}

impl AppState {
    /// Creates the state for one receiver's HTTP listener.
    #[must_use]
    pub fn new(receiver: Receiver, exporters: Arc<Exporters>) -> Self {
        Self {
            receiver,
            exporters,
        }
    }

    /// The receiver fed by this listener.
    #[must_use]
    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    /// Live exporters.
    #[must_use]
    pub fn exporters(&self) -> &Exporters {
        &self.exporters
    }

    /// Process-wide counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<Stats> {
        self.receiver.stats()
    }

    /// Snapshot of every receiver and exporter counter.
    #[must_use]
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats().snapshot(self.exporters.stats())
    }
}
