//! Grading core
//!
//! This crate runs code submissions inside a container sandbox, reads the
//! test reports they produce and folds them into one weighted score.
//!
//! # Features
//!
//! - **Score Trees**: Weighted hierarchical results with per-node provenance
//! - **Report Adapters**: Generic JSON trees, pytest/coverage/flake8, sharded
//!   GoogleTest JSON and JUnit XML multi-module reports
//! - **Sandbox Execution**: Staged copies, container runtime invocation,
//!   process-group timeouts and auxiliary metric collection
//! - **Batch Orchestration**: Sequential grading with a crash-safe result
//!   cache, per-submission failure isolation and CSV/JSON export
//!
//! # Example
//!
//! ```rust,ignore
//! use grader_core::{BatchOptions, BatchOrchestrator, SandboxExecutor, TesterConfig, TesterKind};
//!
//! let config = TesterConfig::for_kind(TesterKind::Python);
//! let executor = SandboxExecutor::new(config)?;
//! let mut batch = BatchOrchestrator::new(executor, BatchOptions::default().with_cache_file("cache.json"));
//! let summary = batch.run(&submissions).await?;
//! ```

pub mod adapters;
pub mod batch;
pub mod error;
pub mod notebook;
pub mod runner;
pub mod score;
pub mod submission;

// Re-exports for convenience
pub use batch::{
    BatchOptions, BatchOrchestrator, BatchProgress, BatchSummary, ExportFormat, ExportOptions,
    ResultCache, SubmissionOutcome, SubmissionRunner,
};
pub use error::{GradeError, GradeResult};
pub use runner::{CodeAnalyzer, SandboxExecutor, SandboxRuntime, Tester, TesterConfig, TesterKind};
pub use score::{Analysis, ExecutionReport, ResultNode};
pub use submission::Submission;
