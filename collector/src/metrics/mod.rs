//! Internal observability for the collector.
//!
//! Counts what enters, leaves and is dropped from the pipeline.

pub mod stats;

pub use stats::{DestinationCounters, DestinationStats, SignalStats, Stats, StatsSnapshot};
