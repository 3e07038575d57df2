//! Batch grading
//!
//! Sequential orchestration over a collection of submissions, the persistent
//! result cache and the CSV/JSON exporters.

pub mod cache;
pub mod export;
pub mod orchestrator;

pub use cache::ResultCache;
pub use export::{ExportFormat, ExportOptions};
pub use orchestrator::{
    BatchOptions, BatchOrchestrator, BatchProgress, BatchSummary, ProgressCallback,
    SubmissionOutcome, SubmissionRunner,
};
