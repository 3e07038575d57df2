//! Execution report for one sandboxed run

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::node::{ResultNode, round2};
use crate::submission::Submission;

/// Output of the qualitative analysis collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Analysis {
    /// One analysis for the whole submission
    Combined(String),
    /// One analysis per independently graded module
    PerModule(BTreeMap<String, String>),
}

impl fmt::Display for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Analysis::Combined(text) => write!(f, "{}", text),
            Analysis::PerModule(modules) => {
                let mut first = true;
                for (module, text) in modules {
                    if !first {
                        writeln!(f)?;
                    }
                    first = false;
                    write!(f, "[{}]\n{}", module, text)?;
                }
                Ok(())
            }
        }
    }
}

/// Outcome of one sandboxed run of a submission
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Whether the run exited with code zero and left a results directory
    pub success: bool,

    /// Captured standard output
    pub stdout: String,

    /// Captured standard error
    pub stderr: String,

    /// Exit code (None on timeout)
    pub return_code: Option<i32>,

    /// Whether the run was killed for exceeding its time budget
    pub timeout: bool,

    /// Host path of the results directory inside the staging copy
    pub results_path: Option<String>,

    /// Root of the score tree, if any report was found
    pub test_tree: Option<ResultNode>,

    /// Root score, or 0 when there is no tree
    pub final_score: Option<f64>,

    /// Number of test cases found in the reports
    pub total_tests: Option<u32>,

    /// Qualitative analysis text
    pub analysis: Option<Analysis>,

    /// Auxiliary metrics (coverage, lint counts, memcheck findings...)
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Originating submission; not owned and not persisted
    #[serde(skip)]
    pub(crate) submission: Option<Weak<Submission>>,
}

impl ExecutionReport {
    /// Report for a run that finished within its budget.
    ///
    /// Scores the tree; a missing tree scores 0 with no tests.
    pub fn completed(
        exit_code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        results_path: Option<String>,
        mut test_tree: Option<ResultNode>,
    ) -> Self {
        let final_score = test_tree
            .as_mut()
            .map(ResultNode::calculate_score)
            .unwrap_or(0.0);
        let total_tests = test_tree.as_ref().map(ResultNode::test_count).unwrap_or(0);
        Self {
            success: exit_code == Some(0),
            stdout: stdout.into(),
            stderr: stderr.into(),
            return_code: exit_code,
            results_path,
            test_tree,
            final_score: Some(final_score),
            total_tests: Some(total_tests),
            ..Default::default()
        }
    }

    /// Report for a run killed by the time budget
    pub fn timed_out(
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        timeout_secs: u64,
        results_path: Option<String>,
    ) -> Self {
        let mut stderr = stderr.into();
        if stderr.is_empty() {
            stderr = format!("Execution timed out after {}s", timeout_secs);
        }
        Self {
            success: false,
            stdout: stdout.into(),
            stderr,
            return_code: None,
            timeout: true,
            results_path,
            final_score: Some(0.0),
            total_tests: Some(0),
            ..Default::default()
        }
    }

    /// Synthetic failing report for a submission whose processing raised an error
    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            stderr: error.to_string(),
            return_code: Some(-1),
            final_score: Some(0.0),
            total_tests: Some(0),
            ..Default::default()
        }
    }

    /// Final score, treating a missing score as zero
    pub fn score(&self) -> f64 {
        self.final_score.unwrap_or(0.0)
    }

    /// Bind the (non-owning) back-reference to the originating submission
    pub fn bind_submission(&mut self, submission: &Arc<Submission>) {
        self.submission = Some(Arc::downgrade(submission));
    }

    /// Originating submission, if it is bound and still alive
    pub fn submission(&self) -> Option<Arc<Submission>> {
        self.submission.as_ref().and_then(Weak::upgrade)
    }

    /// Export representation with scores rounded to two decimals
    pub fn to_dict(&self) -> Value {
        json!({
            "success": self.success,
            "stdout": self.stdout,
            "stderr": self.stderr,
            "return_code": self.return_code,
            "timeout": self.timeout,
            "results_path": self.results_path,
            "test_tree": self.test_tree.as_ref().map(ResultNode::to_dict),
            "final_score": self.final_score.map(round2),
            "total_tests": self.total_tests,
            "analysis": self.analysis,
            "metadata": self.metadata,
        })
    }
}

/// Structural equality; the submission back-reference is ignored
impl PartialEq for ExecutionReport {
    fn eq(&self, other: &Self) -> bool {
        self.success == other.success
            && self.stdout == other.stdout
            && self.stderr == other.stderr
            && self.return_code == other.return_code
            && self.timeout == other.timeout
            && self.results_path == other.results_path
            && self.test_tree == other.test_tree
            && self.final_score == other.final_score
            && self.total_tests == other.total_tests
            && self.analysis == other.analysis
            && self.metadata == other.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_out_report() {
        let report = ExecutionReport::timed_out("partial", "", 30, None);
        assert!(report.timeout);
        assert!(!report.success);
        assert_eq!(report.return_code, None);
        assert_eq!(report.final_score, Some(0.0));
        assert!(report.test_tree.is_none());
        assert_eq!(report.stderr, "Execution timed out after 30s");
    }

    #[test]
    fn test_completed_report_scores_tree() {
        let tree = ResultNode::group(
            "root",
            vec![
                ResultNode::leaf("a", true).with_weight(0.6),
                ResultNode::leaf("b", false).with_weight(0.4),
            ],
        );
        let report = ExecutionReport::completed(Some(0), "out", "", None, Some(tree));
        assert!(report.success);
        assert!((report.score() - 0.6).abs() < 1e-9);
        assert_eq!(report.total_tests, Some(2));
        assert!(report.submission().is_none());

        let empty = ExecutionReport::completed(Some(1), "", "err", None, None);
        assert!(!empty.success);
        assert_eq!(empty.final_score, Some(0.0));
        assert_eq!(empty.total_tests, Some(0));
    }

    #[test]
    fn test_failed_report() {
        let report = ExecutionReport::failed("boom");
        assert_eq!(report.return_code, Some(-1));
        assert_eq!(report.stderr, "boom");
        assert_eq!(report.score(), 0.0);
        assert_eq!(report.final_score, Some(0.0));
        assert_eq!(report.total_tests, Some(0));

        let exported = report.to_dict();
        assert_eq!(exported["final_score"], serde_json::json!(0.0));
        assert_eq!(exported["total_tests"], serde_json::json!(0));
    }

    #[test]
    fn test_submission_reference_is_weak() {
        let submission = Arc::new(Submission::new("alice", "/data/alice"));
        let mut report = ExecutionReport::default();
        report.bind_submission(&submission);
        assert_eq!(report.submission().map(|s| s.key.clone()), Some("alice".to_string()));

        drop(submission);
        assert!(report.submission().is_none());
    }

    #[test]
    fn test_serde_skips_submission() {
        let submission = Arc::new(Submission::new("bob", "/data/bob"));
        let mut report = ExecutionReport {
            final_score: Some(0.5),
            ..Default::default()
        };
        report.bind_submission(&submission);

        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("/data/bob"));
        let restored: ExecutionReport = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, report);
        assert!(restored.submission().is_none());
    }

    #[test]
    fn test_per_module_analysis_display() {
        let mut modules = BTreeMap::new();
        modules.insert("Ex1".to_string(), "good".to_string());
        modules.insert("Ex2".to_string(), "needs work".to_string());
        let text = Analysis::PerModule(modules).to_string();
        assert_eq!(text, "[Ex1]\ngood\n[Ex2]\nneeds work");
    }
}
