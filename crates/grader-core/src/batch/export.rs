//! CSV and JSON export of graded submissions

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde_json::{Value, json};

use crate::error::{GradeError, GradeResult};
use crate::score::{ExecutionReport, round2};

pub const CSV_HEADER: &str = "First name,Surname,ID number,Groups,Filtered groups,Grade,Feedback";

/// Export file format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = GradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(GradeError::config(format!("unsupported export format '{}'", other))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Csv => f.write_str("csv"),
            ExportFormat::Json => f.write_str("json"),
        }
    }
}

/// Export behaviour
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Groups hidden from the "Filtered groups" column
    pub exclude_groups: Vec<String>,

    /// Replace an existing export file
    pub overwrite: bool,
}

impl ExportOptions {
    pub fn with_exclude_groups(mut self, groups: Vec<String>) -> Self {
        self.exclude_groups = groups;
        self
    }

    pub fn overwrite(mut self) -> Self {
        self.overwrite = true;
        self
    }
}

/// Fail when the target exists and overwriting was not requested
pub fn check_target(path: &Path, options: &ExportOptions) -> GradeResult<()> {
    if path.exists() && !options.overwrite {
        return Err(GradeError::ExportExists(path.to_path_buf()));
    }
    Ok(())
}

/// Human readable summary of a report
pub fn build_feedback(report: &ExecutionReport) -> String {
    let mut lines = Vec::new();
    if let Some(tree) = &report.test_tree {
        lines.push(format!("Test Results: {}", tree.label));
        lines.push(format!("  => {} tests found.", report.total_tests.unwrap_or(0)));
        for child in &tree.children {
            let verdict = if child.is_passed() { "Passed" } else { "Failed" };
            lines.push(format!("    - {}: {}", child.label, verdict));
        }
    }
    if let Some(analysis) = &report.analysis {
        lines.push(format!("Code Analysis: {}", analysis));
    }
    lines.join("\n").replace('"', "'")
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Render one CSV row per report with a bound submission
pub fn render_csv<'a>(
    reports: impl IntoIterator<Item = &'a ExecutionReport>,
    options: &ExportOptions,
) -> String {
    let excluded: HashSet<&str> = options.exclude_groups.iter().map(String::as_str).collect();
    let mut out = String::from(CSV_HEADER);
    out.push('\n');

    for report in reports {
        let Some(submission) = report.submission() else {
            tracing::error!("Submission result not available. Row skipped.");
            continue;
        };
        let groups = submission.groups();
        let filtered: Vec<&str> = groups
            .iter()
            .map(String::as_str)
            .filter(|g| !excluded.contains(g))
            .collect();

        let row = [
            quote(submission.student_name().unwrap_or_default()),
            quote(submission.student_surname().unwrap_or_default()),
            quote(&submission.student_id().unwrap_or_default()),
            quote(&groups.join(",")),
            quote(&filtered.join(",")),
            format!("{:.2}", report.score()),
            quote(&build_feedback(report)),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

/// Render `{"results": [...]}` with `score` and `feedback` per entry
pub fn render_json<'a>(
    reports: impl IntoIterator<Item = &'a ExecutionReport>,
) -> GradeResult<String> {
    let mut results = Vec::new();
    for report in reports {
        let Some(submission) = report.submission() else {
            tracing::error!("Submission result not available. Row skipped.");
            continue;
        };
        let mut entry = report.to_dict();
        if let Value::Object(map) = &mut entry {
            map.insert("key".into(), json!(submission.key));
            map.insert("score".into(), json!(round2(report.score())));
            map.insert("feedback".into(), json!(build_feedback(report)));
        }
        results.push(entry);
    }
    Ok(serde_json::to_string_pretty(&json!({ "results": results }))?)
}

/// Write reports to `path` in the requested format
pub async fn export_results<'a>(
    reports: impl IntoIterator<Item = &'a ExecutionReport>,
    path: &Path,
    format: ExportFormat,
    options: &ExportOptions,
) -> GradeResult<()> {
    check_target(path, options)?;

    let content = match format {
        ExportFormat::Csv => render_csv(reports, options),
        ExportFormat::Json => render_json(reports)?,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    tracing::info!(path = %path.display(), format = %format, "Exported results");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::score::{Analysis, ResultNode};
    use crate::submission::Submission;
    use tempfile::TempDir;

    fn graded(submission: &Arc<Submission>, score: f64) -> ExecutionReport {
        let mut tree = ResultNode::group(
            "Python Grading",
            vec![
                ResultNode::leaf("Tests", true).with_weight(0.6),
                ResultNode::leaf("Coverage", false).with_weight(0.4),
            ],
        );
        tree.calculate_score();
        let mut report = ExecutionReport {
            success: true,
            test_tree: Some(tree),
            final_score: Some(score),
            total_tests: Some(5),
            analysis: Some(Analysis::Combined("Use \"snake_case\"".into())),
            ..Default::default()
        };
        report.bind_submission(submission);
        report
    }

    fn student() -> Arc<Submission> {
        Arc::new(
            Submission::new("doe_john", "/tmp/doe")
                .with_info("student_name", "John")
                .with_info("student_surname", "Doe")
                .with_info("student_id", "X123")
                .with_info("student_groups", json!(["A1", "Teachers"])),
        )
    }

    #[test]
    fn test_feedback() {
        let submission = student();
        let feedback = build_feedback(&graded(&submission, 0.6));
        assert_eq!(
            feedback,
            "Test Results: Python Grading\n  => 5 tests found.\n    - Tests: Passed\n    - Coverage: Failed\nCode Analysis: Use 'snake_case'"
        );
    }

    #[test]
    fn test_csv_rows() {
        let submission = student();
        let orphan = ExecutionReport::default();
        let reports = vec![graded(&submission, 0.666), orphan];
        let options = ExportOptions::default().with_exclude_groups(vec!["Teachers".into()]);

        let csv = render_csv(&reports, &options);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        assert_eq!(
            lines.next(),
            Some("\"John\",\"Doe\",\"X123\",\"A1,Teachers\",\"A1\",0.67,\"Test Results: Python Grading")
        );
        // feedback continues over the quoted multi-line field; the orphan row is skipped
        assert_eq!(csv.matches("0.67").count(), 1);
        assert!(!csv.contains("0.00"));
    }

    #[test]
    fn test_json_round_trip() {
        let alice = Arc::new(Submission::new("alice", "/tmp/a"));
        let bob = Arc::new(Submission::new("bob", "/tmp/b"));
        let reports = vec![graded(&alice, 0.8049), graded(&bob, 1.0 / 3.0)];

        let parsed: Value = serde_json::from_str(&render_json(&reports).unwrap()).unwrap();
        let results = parsed["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["key"], json!("alice"));
        assert_eq!(results[0]["score"], json!(0.8));
        assert_eq!(results[1]["score"], json!(0.33));
        assert_eq!(results[1]["final_score"], json!(0.33));
        assert_eq!(results[0]["test_tree"]["children"][1]["children"], json!([]));
    }

    #[tokio::test]
    async fn test_existing_target_requires_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out").join("grades.csv");
        let submission = student();
        let reports = vec![graded(&submission, 1.0)];

        export_results(&reports, &path, ExportFormat::Csv, &ExportOptions::default())
            .await
            .unwrap();
        let err = export_results(&reports, &path, ExportFormat::Csv, &ExportOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GradeError::ExportExists(_)));

        export_results(&reports, &path, ExportFormat::Json, &ExportOptions::default().overwrite())
            .await
            .unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().starts_with('{'));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("xlsx".parse::<ExportFormat>().is_err());
    }
}
