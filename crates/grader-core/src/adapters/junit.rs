//! JUnit XML reports of a multi-module maven build
//!
//! Expects `<results>/surefire-reports/<module>/TEST-*.xml`. Every
//! `testcase` becomes a leaf labelled `suite::case`; leaves are weighted
//! `1/N` inside their module and modules `1/M` under the root.

use std::path::Path;

use anyhow::Result;

use super::metrics::parse_xml;
use super::{file_name, sorted_entries};
use crate::score::{ResultNode, all_passed};

pub const ROOT_LABEL: &str = "JUnit Multi-Module Tests";
pub const REPORTS_DIR: &str = "surefire-reports";

/// Leaves for one report file; a parse failure yields one failing leaf
fn report_leaves(path: &Path) -> Vec<ResultNode> {
    let name = file_name(path);
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => return vec![ResultNode::failure(name, format!("Parse error: {}", e))],
    };
    let doc = match parse_xml(&text) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!(file = %name, error = %e, "Malformed JUnit report");
            return vec![ResultNode::failure(name, format!("Parse error: {}", e))];
        }
    };

    // Some plugins wrap suites in a <testsuites> element
    let root = doc.root_element();
    let suites: Vec<roxmltree::Node<'_, '_>> = if root.has_tag_name("testsuites") {
        root.children().filter(|n| n.has_tag_name("testsuite")).collect()
    } else {
        vec![root]
    };

    let mut leaves = Vec::new();
    for suite in suites {
        let suite_name = suite.attribute("name").unwrap_or(&name);
        for case in suite.children().filter(|n| n.has_tag_name("testcase")) {
            let case_name = case.attribute("name").unwrap_or("Unnamed");
            let label = format!("{}::{}", suite_name, case_name);
            let leaf = match case.children().find(|n| n.has_tag_name("failure")) {
                None => ResultNode::leaf(label, true),
                Some(failure) => {
                    let text = failure
                        .text()
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .or_else(|| failure.attribute("message"))
                        .unwrap_or_default();
                    ResultNode::failure(label, text)
                }
            };
            leaves.push(leaf.with_num_tests(1));
        }
    }
    leaves
}

fn module_node(module_dir: &Path) -> Result<Option<ResultNode>> {
    let mut leaves = Vec::new();
    for path in sorted_entries(module_dir)? {
        let name = file_name(&path);
        if path.is_file() && name.starts_with("TEST-") && name.ends_with(".xml") {
            leaves.extend(report_leaves(&path));
        }
    }
    if leaves.is_empty() {
        return Ok(None);
    }

    let weight = 1.0 / leaves.len() as f64;
    for leaf in &mut leaves {
        leaf.weight = weight;
    }
    let passed = all_passed(&leaves);
    let count = leaves.iter().filter_map(|l| l.num_tests).sum();
    Ok(Some(
        ResultNode::group(file_name(module_dir), leaves)
            .with_passed(passed)
            .with_num_tests(count),
    ))
}

/// Build the multi-module tree; `Ok(None)` when no reports directory exists
pub fn load(results_dir: &Path) -> Result<Option<ResultNode>> {
    let reports_dir = results_dir.join(REPORTS_DIR);
    if !reports_dir.is_dir() {
        return Ok(None);
    }

    let mut modules = Vec::new();
    for module_dir in sorted_entries(&reports_dir)? {
        if module_dir.is_dir() {
            if let Some(node) = module_node(&module_dir)? {
                modules.push(node);
            }
        }
    }

    if modules.is_empty() {
        return Ok(Some(
            ResultNode::failure(ROOT_LABEL, "no test reports found").with_num_tests(0),
        ));
    }

    let weight = 1.0 / modules.len() as f64;
    for module in &mut modules {
        module.weight = weight;
    }
    let passed = all_passed(&modules);
    let count = modules.iter().map(ResultNode::test_count).sum();
    Ok(Some(
        ResultNode::group(ROOT_LABEL, modules)
            .with_passed(passed)
            .with_num_tests(count),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_report(results: &Path, module: &str, file: &str, xml: &str) {
        let dir = results.join(REPORTS_DIR).join(module);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), xml).unwrap();
    }

    #[test]
    fn test_two_modules_normalized() {
        let temp_dir = TempDir::new().unwrap();
        let results = temp_dir.path();
        write_report(
            results,
            "ex1",
            "TEST-edu.ub.CalcTest.xml",
            r#"<testsuite name="edu.ub.CalcTest" tests="2">
                 <testcase name="adds"/>
                 <testcase name="divides"><failure message="boom">  expected 2  </failure></testcase>
               </testsuite>"#,
        );
        write_report(
            results,
            "ex2",
            "TEST-edu.ub.ListTest.xml",
            r#"<testsuite name="edu.ub.ListTest"><testcase name="empty"/></testsuite>"#,
        );
        write_report(results, "ex2", "jacoco.xml", "<report/>");

        let mut root = load(results).unwrap().unwrap();
        assert_eq!(root.label, ROOT_LABEL);
        assert_eq!(root.num_tests, Some(3));
        assert_eq!(root.passed, Some(false));
        // 0.5 * 0.5 + 0.5 * 1.0
        assert!((root.calculate_score() - 0.75).abs() < 1e-9);

        let ex1 = &root.children[0];
        assert_eq!(ex1.children[0].label, "edu.ub.CalcTest::adds");
        assert_eq!(ex1.children[1].message.as_deref(), Some("expected 2"));
    }

    #[test]
    fn test_malformed_report_fails_one_leaf() {
        let temp_dir = TempDir::new().unwrap();
        let results = temp_dir.path();
        write_report(
            results,
            "ex1",
            "TEST-A.xml",
            r#"<testsuite name="A"><testcase name="ok"/></testsuite>"#,
        );
        write_report(results, "ex1", "TEST-B.xml", "<testsuite><testcase");

        let mut root = load(results).unwrap().unwrap();
        let module = &root.children[0];
        assert_eq!(module.children.len(), 2);
        assert_eq!(module.children[1].label, "TEST-B.xml");
        assert!(module.children[1].message.as_deref().unwrap().starts_with("Parse error"));
        assert!((root.calculate_score() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_reports_dir() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join(REPORTS_DIR)).unwrap();

        let root = load(temp_dir.path()).unwrap().unwrap();
        assert_eq!(root.passed, Some(false));
        assert_eq!(root.message.as_deref(), Some("no test reports found"));
    }

    #[test]
    fn test_missing_reports_dir() {
        let temp_dir = TempDir::new().unwrap();
        assert!(load(temp_dir.path()).unwrap().is_none());
    }
}
