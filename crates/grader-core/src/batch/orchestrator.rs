//! Sequential batch grading
//!
//! Submissions are graded one at a time. A cached report is reused as is;
//! otherwise the runner is invoked and any error it returns is converted
//! into a synthetic failing report, so one broken submission never stops
//! the batch. Only configuration problems (unreadable cache, existing export
//! target) abort a run, and they do so before any submission is processed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::cache::ResultCache;
use super::export::{self, ExportFormat, ExportOptions};
use crate::error::GradeResult;
use crate::score::ExecutionReport;
use crate::submission::Submission;

/// Grades one submission
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubmissionRunner: Send + Sync {
    async fn run(&self, submission: &Submission) -> Result<ExecutionReport>;
}

/// Callback for progress updates during a batch
pub type ProgressCallback = Box<dyn Fn(BatchProgress) + Send + Sync>;

/// Progress update during a batch
#[derive(Debug, Clone)]
pub struct BatchProgress {
    /// Number of submissions handled so far, including this one
    pub current: usize,
    /// Number of submissions selected by start/limit
    pub total: usize,
    /// Current submission key
    pub key: String,
    /// Status message
    pub message: String,
}

/// Batch selection and persistence options
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// First position to grade
    pub start: usize,

    /// Positions `>= limit` are not graded
    pub limit: Option<usize>,

    /// Persistent result cache
    pub cache_file: Option<PathBuf>,
}

impl BatchOptions {
    pub fn with_start(mut self, start: usize) -> Self {
        self.start = start;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_file = Some(path.into());
        self
    }

    /// Positions selected for a collection of `len` submissions
    fn window(&self, len: usize) -> std::ops::Range<usize> {
        let end = self.limit.map_or(len, |limit| limit.min(len));
        self.start.min(end)..end
    }
}

/// Result of grading one submission
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// Reused from the cache
    Cached(ExecutionReport),
    /// Freshly produced by the runner
    Completed(ExecutionReport),
    /// The runner failed; `report` is the synthetic failing report.
    /// It is cached like any fresh result.
    Failed {
        report: ExecutionReport,
        error: String,
    },
}

impl SubmissionOutcome {
    pub fn report(&self) -> &ExecutionReport {
        match self {
            SubmissionOutcome::Cached(report)
            | SubmissionOutcome::Completed(report)
            | SubmissionOutcome::Failed { report, .. } => report,
        }
    }

    pub fn into_report(self) -> ExecutionReport {
        match self {
            SubmissionOutcome::Cached(report)
            | SubmissionOutcome::Completed(report)
            | SubmissionOutcome::Failed { report, .. } => report,
        }
    }
}

/// Counters of a batch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub cached: usize,
    pub fresh: usize,
    pub failed: usize,
    pub timed_out: usize,
}

/// Drives a [`SubmissionRunner`] over a collection of submissions
pub struct BatchOrchestrator<R: SubmissionRunner> {
    /// Per-submission grader
    runner: R,

    /// Selection and cache options
    options: BatchOptions,

    /// Progress callback
    progress_callback: Option<ProgressCallback>,

    /// Reports of the last run, in processing order, one per key
    results: Vec<ExecutionReport>,
}

impl<R: SubmissionRunner> BatchOrchestrator<R> {
    pub fn new(runner: R, options: BatchOptions) -> Self {
        Self {
            runner,
            options,
            progress_callback: None,
            results: Vec::new(),
        }
    }

    /// Set progress callback
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Reports of the last run
    pub fn results(&self) -> &[ExecutionReport] {
        &self.results
    }

    /// Report of a submission key from the last run
    pub fn result(&self, key: &str) -> Option<&ExecutionReport> {
        self.results
            .iter()
            .find(|r| r.submission().is_some_and(|s| s.key == key))
    }

    /// Grade one submission without touching the cache
    async fn grade(&self, submission: &Submission) -> SubmissionOutcome {
        match self.runner.run(submission).await {
            Ok(report) => SubmissionOutcome::Completed(report),
            Err(e) => {
                let error = format!("{:#}", e);
                tracing::error!(key = %submission.key, error = %error, "Submission failed");
                SubmissionOutcome::Failed {
                    report: ExecutionReport::failed(&error),
                    error,
                }
            }
        }
    }

    fn report_progress(&self, current: usize, total: usize, key: &str, message: String) {
        if let Some(callback) = &self.progress_callback {
            callback(BatchProgress {
                current,
                total,
                key: key.to_string(),
                message,
            });
        }
    }

    fn store(&mut self, report: ExecutionReport) {
        let key = report.submission().map(|s| s.key.clone());
        let existing = self
            .results
            .iter()
            .position(|r| r.submission().map(|s| s.key.clone()) == key);
        match existing {
            Some(idx) => self.results[idx] = report,
            None => self.results.push(report),
        }
    }

    /// Grade the selected submissions in order
    pub async fn run(&mut self, submissions: &[Arc<Submission>]) -> GradeResult<BatchSummary> {
        let mut cache = match &self.options.cache_file {
            Some(path) => ResultCache::load(path).await?,
            None => ResultCache::in_memory(),
        };

        self.results.clear();
        let window = self.options.window(submissions.len());
        let total = window.len();
        if self.options.start > 0 {
            tracing::debug!(skipped = window.start, "Skipping submissions before start");
        }
        if window.end < submissions.len() {
            tracing::debug!(limit = window.end, "Stopping at submission limit");
        }

        let mut summary = BatchSummary::default();
        for (done, submission) in submissions[window].iter().enumerate() {
            let key = submission.key.as_str();

            let outcome = match cache.get(key) {
                Some(report) => {
                    tracing::info!(key, "Found cached result");
                    SubmissionOutcome::Cached(report.clone())
                }
                None => self.grade(submission).await,
            };

            match &outcome {
                SubmissionOutcome::Cached(_) => summary.cached += 1,
                SubmissionOutcome::Completed(_) => summary.fresh += 1,
                SubmissionOutcome::Failed { .. } => summary.failed += 1,
            }
            if !matches!(outcome, SubmissionOutcome::Cached(_)) {
                cache.insert(key, outcome.report().clone());
                if let Err(e) = cache.flush().await {
                    tracing::error!(key, error = %e, "Failed to persist result cache");
                }
            }
            if outcome.report().timeout {
                summary.timed_out += 1;
            }
            summary.processed += 1;

            let mut report = outcome.into_report();
            report.bind_submission(submission);
            tracing::info!(
                key,
                score = report.score(),
                success = report.success,
                timeout = report.timeout,
                "Submission graded"
            );
            self.report_progress(
                done + 1,
                total,
                key,
                format!("score {:.2}", report.score()),
            );
            self.store(report);
        }

        tracing::info!(
            processed = summary.processed,
            cached = summary.cached,
            failed = summary.failed,
            "Batch finished"
        );
        Ok(summary)
    }

    /// Export the reports of the last run
    pub async fn export(
        &self,
        path: &Path,
        format: ExportFormat,
        options: &ExportOptions,
    ) -> GradeResult<()> {
        export::export_results(&self.results, path, format, options).await
    }

    /// Check the export target, grade, then export
    pub async fn run_and_export(
        &mut self,
        submissions: &[Arc<Submission>],
        path: &Path,
        format: ExportFormat,
        options: &ExportOptions,
    ) -> GradeResult<BatchSummary> {
        export::check_target(path, options)?;
        let summary = self.run(submissions).await?;
        self.export(path, format, options).await?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::GradeError;
    use crate::score::ResultNode;
    use mockall::predicate::always;
    use tempfile::TempDir;

    fn submissions(keys: &[&str]) -> Vec<Arc<Submission>> {
        keys.iter()
            .map(|k| Arc::new(Submission::new(*k, format!("/data/{}", k))))
            .collect()
    }

    fn passing_report() -> ExecutionReport {
        let mut tree = ResultNode::group(
            "root",
            vec![
                ResultNode::leaf("a", true).with_weight(0.6),
                ResultNode::leaf("b", true).with_weight(0.2),
                ResultNode::leaf("c", false).with_weight(0.2),
            ],
        );
        let score = tree.calculate_score();
        ExecutionReport {
            success: true,
            return_code: Some(0),
            test_tree: Some(tree),
            final_score: Some(score),
            total_tests: Some(3),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cache_hit_skips_runner() {
        let temp_dir = TempDir::new().unwrap();
        let cache_file = temp_dir.path().join("cache.json");
        let subs = submissions(&["alice"]);

        let mut runner = MockSubmissionRunner::new();
        runner
            .expect_run()
            .with(always())
            .times(1)
            .returning(|_| Ok(passing_report()));
        let mut batch = BatchOrchestrator::new(
            runner,
            BatchOptions::default().with_cache_file(&cache_file),
        );

        let first = batch.run(&subs).await.unwrap();
        assert_eq!(first.fresh, 1);
        let first_report = batch.results()[0].clone();

        let second = batch.run(&subs).await.unwrap();
        assert_eq!(second.cached, 1);
        assert_eq!(second.fresh, 0);
        assert_eq!(batch.results()[0], first_report);
        assert_eq!(
            batch.results()[0].submission().map(|s| s.key.clone()),
            Some("alice".to_string())
        );
    }

    #[tokio::test]
    async fn test_cache_survives_new_orchestrator() {
        let temp_dir = TempDir::new().unwrap();
        let cache_file = temp_dir.path().join("cache.json");
        let subs = submissions(&["alice", "bob"]);

        let mut runner = MockSubmissionRunner::new();
        runner.expect_run().times(2).returning(|_| Ok(passing_report()));
        let mut batch =
            BatchOrchestrator::new(runner, BatchOptions::default().with_cache_file(&cache_file));
        batch.run(&subs).await.unwrap();
        let expected = batch.results().to_vec();

        let mut runner = MockSubmissionRunner::new();
        runner.expect_run().never();
        let mut batch =
            BatchOrchestrator::new(runner, BatchOptions::default().with_cache_file(&cache_file));
        let summary = batch.run(&subs).await.unwrap();
        assert_eq!(summary.cached, 2);
        assert_eq!(batch.results(), expected.as_slice());
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let subs = submissions(&["a", "b", "c"]);
        let mut runner = MockSubmissionRunner::new();
        runner.expect_run().times(3).returning(|s| {
            if s.key == "b" {
                Err(anyhow::anyhow!("docker daemon not running"))
            } else {
                Ok(passing_report())
            }
        });
        let mut batch = BatchOrchestrator::new(runner, BatchOptions::default());

        let summary = batch.run(&subs).await.unwrap();
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.failed, 1);

        let failed = batch.result("b").unwrap();
        assert_eq!(failed.return_code, Some(-1));
        assert!(!failed.success);
        assert_eq!(failed.stderr, "docker daemon not running");
        assert!(batch.result("c").unwrap().success);
    }

    #[tokio::test]
    async fn test_failed_reports_are_cached() {
        let temp_dir = TempDir::new().unwrap();
        let cache_file = temp_dir.path().join("cache.json");
        let subs = submissions(&["a"]);

        let mut runner = MockSubmissionRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("boom")));
        let mut batch =
            BatchOrchestrator::new(runner, BatchOptions::default().with_cache_file(&cache_file));

        let first = batch.run(&subs).await.unwrap();
        assert_eq!(first.failed, 1);
        assert!(cache_file.is_file());

        let second = batch.run(&subs).await.unwrap();
        assert_eq!(second.cached, 1);
        assert_eq!(second.failed, 0);
        let report = batch.result("a").unwrap();
        assert_eq!(report.return_code, Some(-1));
        assert_eq!(report.stderr, "boom");
    }

    #[tokio::test]
    async fn test_start_and_limit_window() {
        let subs = submissions(&["s0", "s1", "s2", "s3", "s4"]);
        let mut runner = MockSubmissionRunner::new();
        runner.expect_run().times(2).returning(|_| Ok(passing_report()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut batch = BatchOrchestrator::new(
            runner,
            BatchOptions::default().with_start(1).with_limit(3),
        )
        .with_progress(Box::new(move |p| {
            sink.lock().unwrap().push((p.current, p.total, p.key));
        }));

        let summary = batch.run(&subs).await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(1, 2, "s1".to_string()), (2, 2, "s2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_timeouts_counted() {
        let subs = submissions(&["slow"]);
        let mut runner = MockSubmissionRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(ExecutionReport::timed_out("", "", 30, None)));
        let mut batch = BatchOrchestrator::new(runner, BatchOptions::default());

        let summary = batch.run(&subs).await.unwrap();
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.fresh, 1);
    }

    #[tokio::test]
    async fn test_corrupt_cache_aborts_before_grading() {
        let temp_dir = TempDir::new().unwrap();
        let cache_file = temp_dir.path().join("cache.json");
        std::fs::write(&cache_file, "[]").unwrap();

        let mut runner = MockSubmissionRunner::new();
        runner.expect_run().never();
        let mut batch =
            BatchOrchestrator::new(runner, BatchOptions::default().with_cache_file(&cache_file));

        let err = batch.run(&submissions(&["a"])).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_existing_export_aborts_before_grading() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("grades.csv");
        std::fs::write(&out, "old").unwrap();

        let mut runner = MockSubmissionRunner::new();
        runner.expect_run().never();
        let mut batch = BatchOrchestrator::new(runner, BatchOptions::default());

        let err = batch
            .run_and_export(
                &submissions(&["a"]),
                &out,
                ExportFormat::Csv,
                &ExportOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GradeError::ExportExists(_)));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "old");
    }

    #[tokio::test]
    async fn test_json_export_scores() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("grades.json");
        let subs = submissions(&["a", "b"]);

        let mut runner = MockSubmissionRunner::new();
        runner.expect_run().returning(|_| Ok(passing_report()));
        let mut batch = BatchOrchestrator::new(runner, BatchOptions::default());
        batch
            .run_and_export(&subs, &out, ExportFormat::Json, &ExportOptions::default())
            .await
            .unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        let results = parsed["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        for entry in results {
            assert_eq!(entry["score"], serde_json::json!(0.8));
        }
    }
}
