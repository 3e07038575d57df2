//! Python reports: pytest-json-report, coverage.py and flake8
//!
//! The root blends three collectors at fixed fractions. Each collector is
//! loaded independently, so a missing or malformed file only fails its own
//! branch.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::score::ResultNode;

pub const ROOT_LABEL: &str = "Python Grading";
pub const TEST_REPORT_FILE: &str = "test_report.json";
pub const COVERAGE_FILE: &str = "coverage.json";
pub const LINT_FILE: &str = "flake8.json";

pub const TESTS_WEIGHT: f64 = 0.6;
pub const COVERAGE_WEIGHT: f64 = 0.2;
pub const LINT_WEIGHT: f64 = 0.2;

/// Minimum line coverage (percent) for the coverage branch to pass
pub const COVERAGE_THRESHOLD: f64 = 80.0;

#[derive(Debug, Deserialize)]
struct TestReport {
    #[serde(default)]
    tests: Vec<TestEntry>,
}

#[derive(Debug, Deserialize)]
struct TestEntry {
    nodeid: String,
    outcome: String,
    #[serde(default)]
    longrepr: Option<String>,
    #[serde(default)]
    call: Option<CallPhase>,
}

#[derive(Debug, Deserialize)]
struct CallPhase {
    #[serde(default)]
    longrepr: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CoverageReport {
    #[serde(default)]
    totals: Option<CoverageTotals>,
    #[serde(default)]
    meta: Option<CoverageMeta>,
}

#[derive(Debug, Default, Deserialize)]
struct CoverageTotals {
    percent_covered: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct CoverageMeta {
    coverage_percent: Option<f64>,
}

impl CoverageReport {
    fn percent(&self) -> f64 {
        self.totals
            .as_ref()
            .and_then(|t| t.percent_covered)
            .or_else(|| self.meta.as_ref().and_then(|m| m.coverage_percent))
            .unwrap_or(0.0)
    }
}

type LintReport = BTreeMap<String, Vec<Value>>;

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))
}

fn tests_branch(results_dir: &Path) -> ResultNode {
    let report = match read_json::<TestReport>(&results_dir.join(TEST_REPORT_FILE)) {
        Ok(report) => report,
        Err(e) => {
            return ResultNode::failure("Tests", format!("Test error: {:#}", e))
                .with_weight(TESTS_WEIGHT);
        }
    };

    if report.tests.is_empty() {
        return ResultNode::failure("Tests", "no tests collected")
            .with_weight(TESTS_WEIGHT)
            .with_num_tests(0);
    }

    let weight = 1.0 / report.tests.len() as f64;
    let children: Vec<ResultNode> = report
        .tests
        .into_iter()
        .map(|t| {
            let passed = t.outcome == "passed";
            let mut node = ResultNode::leaf(t.nodeid, passed).with_weight(weight);
            if !passed {
                node.message = t.longrepr.or_else(|| t.call.and_then(|c| c.longrepr));
            }
            node
        })
        .collect();

    let count = children.len() as u32;
    ResultNode::group("Tests", children)
        .with_weight(TESTS_WEIGHT)
        .with_num_tests(count)
}

fn coverage_branch(results_dir: &Path) -> ResultNode {
    match read_json::<CoverageReport>(&results_dir.join(COVERAGE_FILE)) {
        Ok(report) => {
            let percent = report.percent();
            ResultNode::leaf("Coverage", percent >= COVERAGE_THRESHOLD)
                .with_weight(COVERAGE_WEIGHT)
                .with_message(format!("{:.1}% coverage", percent))
                .with_num_tests(0)
        }
        Err(e) => ResultNode::failure("Coverage", format!("Coverage error: {:#}", e))
            .with_weight(COVERAGE_WEIGHT)
            .with_num_tests(0),
    }
}

fn lint_branch(results_dir: &Path) -> ResultNode {
    match read_json::<LintReport>(&results_dir.join(LINT_FILE)) {
        Ok(report) => {
            let issues: usize = report.values().map(Vec::len).sum();
            ResultNode::leaf("Linting", issues == 0)
                .with_weight(LINT_WEIGHT)
                .with_message(format!("{} issue(s) found", issues))
                .with_num_tests(0)
        }
        Err(e) => ResultNode::failure("Linting", format!("Linting error: {:#}", e))
            .with_weight(LINT_WEIGHT)
            .with_num_tests(0),
    }
}

/// Build the Python score tree; `None` when the results directory is missing
pub fn load(results_dir: &Path) -> Option<ResultNode> {
    if !results_dir.is_dir() {
        return None;
    }

    let tests = tests_branch(results_dir);
    let count = tests.num_tests.unwrap_or(0);
    let root = ResultNode::group(
        ROOT_LABEL,
        vec![tests, coverage_branch(results_dir), lint_branch(results_dir)],
    )
    .with_num_tests(count);
    Some(root)
}

/// Coverage percentage and lint issue count, when the reports are readable
pub fn collect_metrics(results_dir: &Path) -> Map<String, Value> {
    let mut metrics = Map::new();

    match read_json::<CoverageReport>(&results_dir.join(COVERAGE_FILE)) {
        Ok(report) => {
            metrics.insert("coverage_percent".into(), json!(report.percent()));
        }
        Err(e) => {
            tracing::debug!(error = %e, "No coverage summary");
        }
    }

    match read_json::<LintReport>(&results_dir.join(LINT_FILE)) {
        Ok(report) => {
            let issues: usize = report.values().map(Vec::len).sum();
            metrics.insert("lint_issues".into(), json!(issues));
        }
        Err(e) => {
            tracing::debug!(error = %e, "No lint summary");
        }
    }

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_full_reports() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        write(
            dir,
            TEST_REPORT_FILE,
            r#"{"tests": [
                {"nodeid": "test_a.py::test_ok", "outcome": "passed"},
                {"nodeid": "test_a.py::test_bad", "outcome": "failed",
                 "call": {"longrepr": "assert 1 == 2"}}
            ]}"#,
        );
        write(dir, COVERAGE_FILE, r#"{"totals": {"percent_covered": 91.5}}"#);
        write(dir, LINT_FILE, r#"{"./a.py": [], "./b.py": []}"#);

        let mut root = load(dir).unwrap();
        let score = root.calculate_score();

        // 0.6 * 0.5 + 0.2 + 0.2
        assert!((score - 0.7).abs() < 1e-9);
        assert_eq!(root.label, ROOT_LABEL);
        assert_eq!(root.test_count(), 2);
        let tests = &root.children[0];
        assert_eq!(tests.children[1].message.as_deref(), Some("assert 1 == 2"));
        assert_eq!(root.children[1].message.as_deref(), Some("91.5% coverage"));
    }

    #[test]
    fn test_each_branch_degrades_independently() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        write(
            dir,
            TEST_REPORT_FILE,
            r#"{"tests": [{"nodeid": "t::ok", "outcome": "passed"}]}"#,
        );
        write(dir, COVERAGE_FILE, "not json");
        write(dir, LINT_FILE, r#"{"./a.py": [{"code": "E501"}, {"code": "W291"}]}"#);

        let mut root = load(dir).unwrap();
        let score = root.calculate_score();
        assert!((score - 0.6).abs() < 1e-9);

        let coverage = &root.children[1];
        assert_eq!(coverage.passed, Some(false));
        assert!(coverage.message.as_deref().unwrap().starts_with("Coverage error"));

        let lint = &root.children[2];
        assert_eq!(lint.message.as_deref(), Some("2 issue(s) found"));
    }

    #[test]
    fn test_no_tests_collected() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), TEST_REPORT_FILE, r#"{"tests": []}"#);

        let root = load(temp_dir.path()).unwrap();
        assert_eq!(root.children[0].message.as_deref(), Some("no tests collected"));
        assert_eq!(root.children[0].passed, Some(false));
    }

    #[test]
    fn test_missing_results_dir() {
        let temp_dir = TempDir::new().unwrap();
        assert!(load(&temp_dir.path().join("results")).is_none());
    }

    #[test]
    fn test_metrics_use_legacy_coverage_field() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), COVERAGE_FILE, r#"{"meta": {"coverage_percent": 42.0}}"#);

        let metrics = collect_metrics(temp_dir.path());
        assert_eq!(metrics["coverage_percent"], json!(42.0));
        assert!(!metrics.contains_key("lint_issues"));
    }
}
