//! Pipeline counters.
//!
//! Every record that leaves the pipeline without being delivered is counted here,
//! so nothing is dropped silently. Counters are exposed at `GET /internal/stats`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::models::SignalKind;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Ingestion counters for one signal kind.
#[derive(Debug, Default)]
pub struct SignalCounters {
    received_records: AtomicU64,
    rejected_records: AtomicU64,
    malformed_requests: AtomicU64,
    refused_records: AtomicU64,
}

impl SignalCounters {
    fn snapshot(&self) -> SignalStats {
        SignalStats {
            received_records: self.received_records.load(Ordering::Relaxed),
            rejected_records: self.rejected_records.load(Ordering::Relaxed),
            malformed_requests: self.malformed_requests.load(Ordering::Relaxed),
            refused_records: self.refused_records.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time ingestion counters for one signal kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalStats {
    /// Records decoded and handed to the router.
    pub received_records: u64,
    /// Records dropped during decoding (reported as partial success).
    pub rejected_records: u64,
    /// Requests rejected because the payload could not be decoded.
    pub malformed_requests: u64,
    /// Records with no pipeline, or from a receiver the pipeline does not list.
    pub refused_records: u64,
}

/// Delivery counters for one (exporter, signal) destination.
#[derive(Debug, Default)]
pub struct DestinationCounters {
    sent_batches: AtomicU64,
    sent_records: AtomicU64,
    retries: AtomicU64,
    failed_batches: AtomicU64,
    failed_records: AtomicU64,
    dropped_batches: AtomicU64,
    dropped_records: AtomicU64,
}

impl DestinationCounters {
    /// Records a delivered batch.
    pub fn record_sent(&self, records: usize) {
        self.sent_batches.fetch_add(1, Ordering::Relaxed);
        self.sent_records.fetch_add(records as u64, Ordering::Relaxed);
    }

    /// Records a retry attempt.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a batch abandoned after its last attempt.
    pub fn record_failed(&self, records: usize) {
        self.failed_batches.fetch_add(1, Ordering::Relaxed);
        self.failed_records.fetch_add(records as u64, Ordering::Relaxed);
    }

    /// Records a batch evicted from a full queue.
    pub fn record_dropped(&self, records: usize) {
        self.dropped_batches.fetch_add(1, Ordering::Relaxed);
        self.dropped_records.fetch_add(records as u64, Ordering::Relaxed);
    }

    /// Returns the current values.
    #[must_use]
    pub fn snapshot(&self, queued_batches: usize) -> DestinationStats {
        DestinationStats {
            queued_batches,
            sent_batches: self.sent_batches.load(Ordering::Relaxed),
            sent_records: self.sent_records.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            failed_records: self.failed_records.load(Ordering::Relaxed),
            dropped_batches: self.dropped_batches.load(Ordering::Relaxed),
            dropped_records: self.dropped_records.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time delivery counters for one destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationStats {
    /// Batches waiting in the queue.
    pub queued_batches: usize,
    /// Batches delivered.
    pub sent_batches: u64,
    /// Records delivered.
    pub sent_records: u64,
    /// Retry attempts made.
    pub retries: u64,
    /// Batches abandoned after exhausting retries or failing permanently.
    pub failed_batches: u64,
    /// Records in abandoned batches.
    pub failed_records: u64,
    /// Batches evicted because the queue was full.
    pub dropped_batches: u64,
    /// Records in evicted batches.
    pub dropped_records: u64,
}

/// Process-wide ingestion counters.
#[derive(Debug)]
pub struct Stats {
    traces: SignalCounters,
    metrics: SignalCounters,
    logs: SignalCounters,
    started_at: DateTime<Utc>,
}

impl Stats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            traces: SignalCounters::default(),
            metrics: SignalCounters::default(),
            logs: SignalCounters::default(),
            started_at: Utc::now(),
        }
    }

    fn signal(&self, kind: SignalKind) -> &SignalCounters {
        match kind {
            SignalKind::Traces => &self.traces,
            SignalKind::Metrics => &self.metrics,
            SignalKind::Logs => &self.logs,
        }
    }

    /// Counts records accepted from a receiver.
    pub fn record_received(&self, kind: SignalKind, records: usize) {
        self.signal(kind)
            .received_records
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    /// Counts records dropped while decoding.
    pub fn record_rejected(&self, kind: SignalKind, records: u64) {
        self.signal(kind)
            .rejected_records
            .fetch_add(records, Ordering::Relaxed);
    }

    /// Counts a request whose payload could not be decoded.
    pub fn record_malformed(&self, kind: SignalKind) {
        self.signal(kind)
            .malformed_requests
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Counts records the router refused.
    pub fn record_refused(&self, kind: SignalKind, records: usize) {
        self.signal(kind)
            .refused_records
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    /// Returns the ingestion counters for one signal.
    #[must_use]
    pub fn signal_stats(&self, kind: SignalKind) -> SignalStats {
        self.signal(kind).snapshot()
    }

    /// Returns all ingestion counters together with per-destination delivery counters.
    #[must_use]
    pub fn snapshot(
        &self,
        exporters: BTreeMap<String, BTreeMap<SignalKind, DestinationStats>>,
    ) -> StatsSnapshot {
        let now = Utc::now();
        StatsSnapshot {
            collected_at: now,
            uptime_seconds: now
                .signed_duration_since(self.started_at)
                .num_seconds()
                .max(0),
            signals: SignalKind::ALL
                .into_iter()
                .map(|kind| (kind, self.signal_stats(kind)))
                .collect(),
            exporters,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

/// Response body of `GET /internal/stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// When the snapshot was taken.
    pub collected_at: DateTime<Utc>,
    /// Seconds since the collector started.
    pub uptime_seconds: i64,
    /// Ingestion counters per signal.
    pub signals: BTreeMap<SignalKind, SignalStats>,
    /// Delivery counters per exporter and signal.
    pub exporters: BTreeMap<String, BTreeMap<SignalKind, DestinationStats>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_counters_are_independent() {
        let stats = Stats::new();
        stats.record_received(SignalKind::Traces, 3);
        stats.record_rejected(SignalKind::Traces, 1);
        stats.record_malformed(SignalKind::Logs);
        stats.record_refused(SignalKind::Metrics, 4);

        let traces = stats.signal_stats(SignalKind::Traces);
        assert_eq!(traces.received_records, 3);
        assert_eq!(traces.rejected_records, 1);
        assert_eq!(traces.malformed_requests, 0);

        assert_eq!(stats.signal_stats(SignalKind::Logs).malformed_requests, 1);
        assert_eq!(stats.signal_stats(SignalKind::Metrics).refused_records, 4);
    }

    #[test]
    fn test_destination_counters() {
        let counters = DestinationCounters::default();
        counters.record_sent(10);
        counters.record_retry();
        counters.record_retry();
        counters.record_failed(2);
        counters.record_dropped(5);

        let snapshot = counters.snapshot(7);
        assert_eq!(snapshot.queued_batches, 7);
        assert_eq!(snapshot.sent_batches, 1);
        assert_eq!(snapshot.sent_records, 10);
        assert_eq!(snapshot.retries, 2);
        assert_eq!(snapshot.failed_batches, 1);
        assert_eq!(snapshot.failed_records, 2);
        assert_eq!(snapshot.dropped_batches, 1);
        assert_eq!(snapshot.dropped_records, 5);
    }

    #[test]
    fn test_snapshot_serializes_signal_keys() {
        let stats = Stats::new();
        stats.record_received(SignalKind::Logs, 2);
        let snapshot = stats.snapshot(BTreeMap::new());

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["signals"]["logs"]["received_records"], 2);
        assert_eq!(json["signals"]["traces"]["received_records"], 0);
        assert!(json["exporters"].as_object().unwrap().is_empty());
    }
}
