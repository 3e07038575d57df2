//! Sandbox runner
//!
//! This module provides the sandboxed execution of a single submission:
//! configuration, staging copies, container invocation, ecosystem profiles
//! and the optional qualitative analysis hook.

pub mod analysis;
pub mod config;
pub mod container;
pub mod executor;
pub mod profiles;
pub mod sandbox;

pub use analysis::{CodeAnalyzer, SourceExtractor};
pub use config::{Mount, SandboxRuntime, TesterConfig, TesterKind};
pub use container::{Invocation, RunOutput};
pub use executor::SandboxExecutor;
pub use profiles::{ProfileDefaults, Tester};
pub use sandbox::Staging;
