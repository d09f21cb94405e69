//! Debug exporter.
//!
//! Writes every batch to the collector's own log and optionally keeps the most
//! recent records in memory for `GET /internal/debug/{exporter}`.

use super::ExportError;
use shared::config::{DebugSettings, Verbosity};
use shared::models::{Batch, SignalKind, TelemetryRecord};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Logs batches at the configured verbosity.
#[derive(Debug)]
pub struct DebugExporter {
    id: String,
    verbosity: Verbosity,
    capacity: usize,
    retained: Mutex<VecDeque<TelemetryRecord>>,
}

impl DebugExporter {
    /// Creates a debug exporter.
    #[must_use]
    pub fn new(id: impl Into<String>, settings: &DebugSettings) -> Self {
        Self {
            id: id.into(),
            verbosity: settings.verbosity,
            capacity: settings.retain,
            retained: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<TelemetryRecord>> {
        self.retained.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Logs a batch.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be rendered as JSON at `detailed` verbosity.
    pub fn export(&self, kind: SignalKind, batch: &Batch) -> Result<(), ExportError> {
        match self.verbosity {
            Verbosity::Basic => {
                tracing::info!(
                    exporter = %self.id,
                    signal = %kind,
                    records = batch.len(),
                    "Debug export"
                );
            }
            Verbosity::Normal => {
                for record in &batch.records {
                    tracing::info!(
                        exporter = %self.id,
                        signal = %kind,
                        service = %record.service(),
                        "{}",
                        summarize(record)
                    );
                }
            }
            Verbosity::Detailed => {
                for record in &batch.records {
                    let json = serde_json::to_string(record)
                        .map_err(|e| ExportError::Encode(e.to_string()))?;
                    tracing::info!(exporter = %self.id, signal = %kind, record = %json, "Debug export");
                }
            }
        }

        if self.capacity > 0 {
            let mut retained = self.lock();
            for record in &batch.records {
                if retained.len() == self.capacity {
                    retained.pop_front();
                }
                retained.push_back(record.clone());
            }
        }
        Ok(())
    }

    /// Returns the retained records, oldest first.
    #[must_use]
    pub fn retained(&self) -> Vec<TelemetryRecord> {
        self.lock().iter().cloned().collect()
    }
}

fn summarize(record: &TelemetryRecord) -> String {
    match record {
        TelemetryRecord::Span(span) => format!(
            "span {} trace_id={} span_id={} duration={}ms",
            span.name,
            span.trace_id,
            span.span_id,
            span.duration().num_milliseconds()
        ),
        TelemetryRecord::Metric(point) => {
            format!("metric {} {:?} = {}", point.name, point.kind, point.value)
        }
        TelemetryRecord::Log(entry) => format!("log [{}] {}", entry.level, entry.body),
    }
}
