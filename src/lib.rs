//! Grader
//!
//! Sandboxed batch grading of code submissions. See [`grader_core`] for the
//! score tree, report adapters, sandbox executor and batch orchestrator.

pub use grader_core::*;
