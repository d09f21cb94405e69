//! Pipeline plumbing between receivers and exporters.

pub mod queue;
pub mod router;

pub use queue::{BatchQueue, PushOutcome};
pub use router::PipelineRouter;

/// What happened to the records of one routed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteSummary {
    /// Records handed to at least one pipeline.
    pub routed: usize,
    /// Records with no pipeline for their signal or receiver.
    pub refused: usize,
}
