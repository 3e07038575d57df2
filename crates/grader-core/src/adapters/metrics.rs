//! Auxiliary XML metrics: jacoco coverage, checkstyle and valgrind memcheck
//!
//! Metric failures are recorded next to the metric (`*_error`) and never
//! raised, so they can be collected whether or not a score was computed.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::{Map, Value, json};

use super::{file_name, find_first, sorted_entries};

pub const JACOCO_FILE: &str = "jacoco.xml";
pub const CHECKSTYLE_FILE: &str = "checkstyle-result.xml";

/// Parse an XML document, accepting a DOCTYPE (jacoco reports carry one)
pub(crate) fn parse_xml(text: &str) -> Result<roxmltree::Document<'_>, roxmltree::Error> {
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    };
    roxmltree::Document::parse_with_options(text, options)
}

/// Instruction coverage from a jacoco report
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coverage {
    pub covered: u64,
    pub missed: u64,
}

impl Coverage {
    pub fn total(&self) -> u64 {
        self.covered + self.missed
    }

    pub fn percent(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => 100.0 * self.covered as f64 / total as f64,
        }
    }
}

fn is_instruction_counter(node: &roxmltree::Node<'_, '_>) -> bool {
    node.has_tag_name("counter") && node.attribute("type") == Some("INSTRUCTION")
}

/// Read the report-level INSTRUCTION counter of a jacoco XML file
pub fn jacoco_coverage(path: &Path) -> Result<Coverage> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let doc = parse_xml(&text)?;
    let root = doc.root_element();

    let counter = root
        .children()
        .find(is_instruction_counter)
        .or_else(|| root.descendants().find(is_instruction_counter))
        .ok_or_else(|| anyhow!("no INSTRUCTION counter"))?;

    let attr = |name: &str| -> Result<u64> {
        counter
            .attribute(name)
            .ok_or_else(|| anyhow!("counter has no '{}' attribute", name))?
            .parse::<u64>()
            .with_context(|| format!("invalid '{}' attribute", name))
    };

    Ok(Coverage {
        covered: attr("covered")?,
        missed: attr("missed")?,
    })
}

/// Count `<error>` elements of a checkstyle result file
pub fn checkstyle_violations(path: &Path) -> Result<u64> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let doc = parse_xml(&text)?;
    Ok(doc.descendants().filter(|n| n.has_tag_name("error")).count() as u64)
}

/// Findings of one valgrind `--xml=yes` report
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Memcheck {
    pub errors: u64,
    pub leaks: u64,
}

/// Count `<error>` elements of a valgrind report; `Ok(None)` for other XML files
pub fn memcheck_findings(path: &Path) -> Result<Option<Memcheck>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let doc = parse_xml(&text)?;
    if !doc.root_element().has_tag_name("valgrindoutput") {
        return Ok(None);
    }

    let mut findings = Memcheck::default();
    for error in doc.root_element().children().filter(|n| n.has_tag_name("error")) {
        findings.errors += 1;
        let kind = error
            .children()
            .find(|n| n.has_tag_name("kind"))
            .and_then(|n| n.text())
            .unwrap_or_default();
        if kind.starts_with("Leak_") {
            findings.leaks += 1;
        }
    }
    Ok(Some(findings))
}

/// Per-module jacoco and checkstyle metrics of a maven results directory.
///
/// Returns `{"coverage": {module: ...}, "checkstyle": {module: ...}}`.
pub fn collect_java(reports_dir: &Path) -> Result<Map<String, Value>> {
    let mut coverage = Map::new();
    let mut checkstyle = Map::new();

    if reports_dir.is_dir() {
        for module_dir in sorted_entries(reports_dir)? {
            if !module_dir.is_dir() {
                continue;
            }
            let module = file_name(&module_dir);

            if let Some(path) = find_first(&module_dir, JACOCO_FILE) {
                let entry = match jacoco_coverage(&path) {
                    Ok(c) => json!({
                        "coverage_covered": c.covered,
                        "coverage_missed": c.missed,
                        "coverage_total": c.total(),
                        "coverage_percent": crate::score::round2(c.percent()),
                        "coverage_error": null,
                    }),
                    Err(e) => json!({
                        "coverage_percent": null,
                        "coverage_error": format!("{:#}", e),
                    }),
                };
                coverage.insert(module.clone(), entry);
            }

            if let Some(path) = find_first(&module_dir, CHECKSTYLE_FILE) {
                let entry = match checkstyle_violations(&path) {
                    Ok(count) => json!({
                        "checkstyle_violations": count,
                        "checkstyle_error": null,
                    }),
                    Err(e) => json!({
                        "checkstyle_violations": null,
                        "checkstyle_error": format!("{:#}", e),
                    }),
                };
                checkstyle.insert(module, entry);
            }
        }
    }

    let mut metrics = Map::new();
    metrics.insert("coverage".into(), Value::Object(coverage));
    metrics.insert("checkstyle".into(), Value::Object(checkstyle));
    Ok(metrics)
}

/// Memcheck findings for every valgrind XML report below a directory, keyed by file stem
pub fn collect_memcheck(results_dir: &Path) -> Map<String, Value> {
    let mut reports = Map::new();

    for entry in walkdir::WalkDir::new(results_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("xml")
        {
            continue;
        }
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        match memcheck_findings(path) {
            Ok(Some(findings)) => {
                reports.insert(
                    stem,
                    json!({
                        "errors": findings.errors,
                        "leaks": findings.leaks,
                        "memcheck_error": null,
                    }),
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(file = %path.display(), error = %e, "Skipping unreadable XML report");
            }
        }
    }

    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const JACOCO: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<!DOCTYPE report PUBLIC "-//JACOCO//DTD Report 1.1//EN" "report.dtd">
<report name="ex1">
  <package name="edu/ub">
    <counter type="INSTRUCTION" missed="1" covered="1"/>
  </package>
  <counter type="INSTRUCTION" missed="25" covered="75"/>
  <counter type="LINE" missed="3" covered="9"/>
</report>"#;

    #[test]
    fn test_jacoco_uses_report_counter() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(JACOCO_FILE);
        std::fs::write(&path, JACOCO).unwrap();

        let coverage = jacoco_coverage(&path).unwrap();
        assert_eq!(coverage, Coverage { covered: 75, missed: 25 });
        assert_eq!(coverage.percent(), 75.0);
    }

    #[test]
    fn test_collect_java_records_errors_per_module() {
        let temp_dir = TempDir::new().unwrap();
        let reports = temp_dir.path();
        std::fs::create_dir_all(reports.join("ex1")).unwrap();
        std::fs::create_dir_all(reports.join("ex2")).unwrap();
        std::fs::write(reports.join("ex1").join(JACOCO_FILE), JACOCO).unwrap();
        std::fs::write(
            reports.join("ex1").join(CHECKSTYLE_FILE),
            r#"<checkstyle><file name="A.java"><error line="1"/><error line="4"/></file></checkstyle>"#,
        )
        .unwrap();
        std::fs::write(reports.join("ex2").join(JACOCO_FILE), "<report>").unwrap();

        let metrics = collect_java(reports).unwrap();
        assert_eq!(metrics["coverage"]["ex1"]["coverage_percent"], json!(75.0));
        assert_eq!(metrics["coverage"]["ex1"]["coverage_total"], json!(100));
        assert_eq!(metrics["checkstyle"]["ex1"]["checkstyle_violations"], json!(2));
        assert_eq!(metrics["coverage"]["ex2"]["coverage_percent"], Value::Null);
        assert!(metrics["coverage"]["ex2"]["coverage_error"].is_string());
    }

    #[test]
    fn test_collect_java_without_reports() {
        let temp_dir = TempDir::new().unwrap();
        let metrics = collect_java(&temp_dir.path().join("surefire-reports")).unwrap();
        assert_eq!(metrics["coverage"], json!({}));
        assert_eq!(metrics["checkstyle"], json!({}));
    }

    #[test]
    fn test_memcheck_counts_errors_and_leaks() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        std::fs::write(
            dir.join("memcheck_ex1.xml"),
            r#"<?xml version="1.0"?>
<valgrindoutput>
  <error><unique>0x1</unique><kind>InvalidRead</kind></error>
  <error><unique>0x2</unique><kind>Leak_DefinitelyLost</kind></error>
</valgrindoutput>"#,
        )
        .unwrap();
        std::fs::write(dir.join("other.xml"), "<testsuite/>").unwrap();

        let reports = collect_memcheck(dir);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports["memcheck_ex1"]["errors"], json!(2));
        assert_eq!(reports["memcheck_ex1"]["leaks"], json!(1));
    }
}
