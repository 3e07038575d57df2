//! Tester registry
//!
//! Each [`TesterKind`] resolves to one fixed [`Tester`] implementation. The
//! sandbox protocol itself (staging, invocation, report assembly) lives in
//! [`SandboxExecutor`](super::SandboxExecutor); profiles only contribute the
//! ecosystem specific steps.

mod cpp;
mod generic;
mod java;
mod python;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

pub use cpp::CppTester;
pub use generic::GenericTester;
pub use java::JavaTester;
pub use python::PythonTester;

use super::config::{Mount, TesterConfig, TesterKind};
use super::container::{self, Invocation, RunOutput};
use crate::error::GradeResult;
use crate::score::ResultNode;

/// Values a profile contributes to unset configuration fields
#[derive(Debug, Clone)]
pub struct ProfileDefaults {
    pub image: Option<String>,
    pub timeout: Duration,
    pub run_cmd: Option<String>,
    pub result_path: Option<String>,
    pub grading_file: Option<String>,
    pub detect_working_dir: bool,
    pub code_extensions: Vec<String>,
    pub comment_symbol: String,
    pub placeholder_file: Option<String>,
    pub module_slots: Option<Vec<String>>,
    pub mounts: Vec<Mount>,
}

impl Default for ProfileDefaults {
    fn default() -> Self {
        Self {
            image: None,
            timeout: Duration::from_secs(10),
            run_cmd: None,
            result_path: None,
            grading_file: None,
            detect_working_dir: false,
            code_extensions: [".py", ".java", ".c", ".h", ".cpp", ".hpp", ".hcc"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            comment_symbol: "#".to_string(),
            placeholder_file: None,
            module_slots: None,
            mounts: Vec::new(),
        }
    }
}

/// Ecosystem specific steps of a sandboxed grading run
#[async_trait]
pub trait Tester: Send + Sync {
    fn kind(&self) -> TesterKind;

    /// Defaults merged into the configuration at load time
    fn defaults(&self) -> ProfileDefaults;

    /// Project root inside a source tree, when the profile can detect one
    fn working_dir(&self, _code_dir: &Path, _config: &TesterConfig) -> Option<PathBuf> {
        None
    }

    /// Adjust the staging copy before the run
    async fn prepare(&self, _code_dir: &Path, _config: &TesterConfig) -> Result<()> {
        Ok(())
    }

    /// Launch the sandbox; shared by every profile
    async fn execute(&self, invocation: &Invocation) -> GradeResult<RunOutput> {
        container::run(invocation).await
    }

    /// Build the score tree from the results directory.
    ///
    /// `Ok(None)` means no report was produced at all.
    fn parse_results(&self, results_dir: &Path, config: &TesterConfig)
    -> Result<Option<ResultNode>>;

    /// Auxiliary metrics merged into the report metadata
    fn collect_metrics(&self, _results_dir: &Path, _config: &TesterConfig) -> Map<String, Value> {
        Map::new()
    }
}

/// Resolve a discriminator to its tester
pub fn resolve(kind: TesterKind) -> Arc<dyn Tester> {
    match kind {
        TesterKind::Generic => Arc::new(GenericTester),
        TesterKind::Python => Arc::new(PythonTester),
        TesterKind::Cpp => Arc::new(CppTester),
        TesterKind::Java => Arc::new(JavaTester),
    }
}
