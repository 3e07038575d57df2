//! Sandboxed execution of one submission
//!
//! Stages the source tree, lets the profile prepare it, runs the sandbox
//! with a time budget and assembles an [`ExecutionReport`] from the results
//! directory left in the staging copy.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use super::analysis::{CodeAnalyzer, SourceExtractor};
use super::config::TesterConfig;
use super::container::Invocation;
use super::profiles::{self, Tester};
use super::sandbox::Staging;
use crate::batch::SubmissionRunner;
use crate::error::GradeResult;
use crate::score::{Analysis, ExecutionReport};
use crate::submission::Submission;

/// Runs submissions in the sandbox described by a [`TesterConfig`]
pub struct SandboxExecutor {
    /// Resolved configuration (profile defaults applied)
    config: TesterConfig,

    /// Ecosystem profile
    tester: Arc<dyn Tester>,

    /// Optional qualitative reviewer
    analyzer: Option<Arc<dyn CodeAnalyzer>>,
}

impl std::fmt::Debug for SandboxExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxExecutor")
            .field("kind", &self.config.kind)
            .field("runtime", &self.config.runtime)
            .field("analyzer", &self.analyzer.is_some())
            .finish_non_exhaustive()
    }
}

impl SandboxExecutor {
    /// Resolve the profile, apply its defaults and validate the configuration
    pub fn new(mut config: TesterConfig) -> GradeResult<Self> {
        let tester = profiles::resolve(config.kind);
        config.apply_defaults(&tester.defaults());
        config.validate()?;

        Ok(Self {
            config,
            tester,
            analyzer: None,
        })
    }

    /// Attach a qualitative analysis collaborator
    pub fn with_analyzer(mut self, analyzer: Arc<dyn CodeAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn config(&self) -> &TesterConfig {
        &self.config
    }

    /// Grade one source tree
    pub async fn run_source(&self, source_dir: &Path) -> Result<ExecutionReport> {
        let execution_id = self
            .config
            .execution_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let staging = Staging::create(&self.config, &execution_id)?;
        let result = match staging.populate(source_dir).await {
            Ok(()) => self.run_staged(source_dir, &staging, &execution_id).await,
            Err(e) => Err(e.into()),
        };
        staging.finish();
        result
    }

    async fn run_staged(
        &self,
        source_dir: &Path,
        staging: &Staging,
        execution_id: &str,
    ) -> Result<ExecutionReport> {
        let code_dir = staging.code_dir();
        self.tester.prepare(&code_dir, &self.config).await?;

        let working_dir = self.tester.working_dir(&code_dir, &self.config);
        let invocation = Invocation::from_config(
            &self.config,
            format!("grader-{}", execution_id),
            &code_dir,
            working_dir,
        );
        tracing::info!(
            execution_id,
            kind = %self.config.kind,
            workdir = %invocation.container_workdir(),
            "Running sandbox"
        );
        let output = self.tester.execute(&invocation).await?;

        let results_dir = code_dir.join(self.config.results_dir_name());
        let results_path = Some(results_dir.display().to_string());

        if output.timed_out {
            return Ok(ExecutionReport::timed_out(
                output.stdout,
                output.stderr,
                self.config.time_budget().as_secs(),
                results_path,
            ));
        }

        let tree = self.tester.parse_results(&results_dir, &self.config)?;
        let mut report = ExecutionReport::completed(
            output.exit_code,
            output.stdout,
            output.stderr,
            results_path,
            tree,
        );
        report.success &= results_dir.is_dir();
        report.metadata.insert("execution_id".into(), json!(execution_id));
        report
            .metadata
            .insert("duration_secs".into(), json!(output.duration.as_secs_f64()));

        if self.config.perform_analysis {
            if let Some(analyzer) = &self.analyzer {
                self.analyze(analyzer.as_ref(), source_dir, &mut report).await;
            }
        }

        for (key, value) in self.tester.collect_metrics(&results_dir, &self.config) {
            report.metadata.insert(key, value);
        }

        tracing::info!(
            execution_id,
            success = report.success,
            score = report.score(),
            total_tests = report.total_tests.unwrap_or(0),
            "Sandbox run finished"
        );
        Ok(report)
    }

    /// Run the analyzer on the original sources; failures go to `analysis_error`
    async fn analyze(&self, analyzer: &dyn CodeAnalyzer, source_dir: &Path, report: &mut ExecutionReport) {
        let extractor = SourceExtractor::from_config(&self.config);

        if !self.config.analysis_per_module {
            let source = extractor.extract(source_dir);
            match analyzer.analyze(&source).await {
                Ok(text) => report.analysis = Some(Analysis::Combined(text)),
                Err(e) => {
                    tracing::warn!(error = %e, "Code analysis failed");
                    report
                        .metadata
                        .insert("analysis_error".into(), json!(format!("{:#}", e)));
                }
            }
            return;
        }

        let project_root = self
            .tester
            .working_dir(source_dir, &self.config)
            .unwrap_or_else(|| source_dir.to_path_buf());

        let mut analyses = std::collections::BTreeMap::new();
        let mut errors = Map::new();
        for (module, source) in extractor.extract_modules(&project_root) {
            match analyzer.analyze(&source).await {
                Ok(text) => {
                    analyses.insert(module, text);
                }
                Err(e) => {
                    tracing::warn!(module = %module, error = %e, "Code analysis failed");
                    errors.insert(module, Value::String(format!("{:#}", e)));
                }
            }
        }
        report.analysis = Some(Analysis::PerModule(analyses));
        if !errors.is_empty() {
            report.metadata.insert("analysis_error".into(), Value::Object(errors));
        }
    }
}

#[async_trait]
impl SubmissionRunner for SandboxExecutor {
    async fn run(&self, submission: &Submission) -> Result<ExecutionReport> {
        self.run_source(submission.path()).await
    }
}
