//! GoogleTest sharded JSON reports
//!
//! A C++ build writes one `--gtest_output=json` file per test binary. Shards
//! are first merged by their `name` field (counters summed, test cases of
//! each sub-suite concatenated in file order), then turned into a tree:
//!
//! ```text
//! [GTest Summary]          only when more than one group exists
//!   group                  weight 1/groups
//!     testsuite            weight 1/testsuites in the group
//!       testcase           weight 1/cases in the testsuite
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::{file_name, sorted_entries};
use crate::score::{ResultNode, all_passed};

pub const SUMMARY_LABEL: &str = "GTest Summary";

const SUITE_RULE: &str = "--------------";

/// Summary counters carried by groups and testsuites
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    #[serde(default)]
    pub tests: u32,
    #[serde(default)]
    pub failures: u32,
    #[serde(default)]
    pub disabled: u32,
    #[serde(default)]
    pub errors: u32,
}

impl Counters {
    fn add(&mut self, other: Counters) {
        self.tests += other.tests;
        self.failures += other.failures;
        self.disabled += other.disabled;
        self.errors += other.errors;
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TestFailure {
    #[serde(default)]
    pub failure: String,
}

/// One test case record
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TestCase {
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub result: String,
    /// Present only when the case failed, even if the list is empty
    #[serde(default)]
    pub failures: Option<Vec<TestFailure>>,
}

impl TestCase {
    pub fn passed(&self) -> bool {
        self.status == "RUN" && self.result == "COMPLETED" && self.failures.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct RawTestSuite {
    name: String,
    #[serde(flatten)]
    counters: Counters,
    #[serde(default)]
    testsuite: Vec<TestCase>,
}

/// One shard file as written by a test binary
#[derive(Debug, Deserialize)]
pub struct Shard {
    #[serde(default = "default_shard_name")]
    name: String,
    #[serde(flatten)]
    counters: Counters,
    testsuites: Vec<RawTestSuite>,
}

fn default_shard_name() -> String {
    "Unknown".to_string()
}

/// A testsuite after merging
#[derive(Debug, Clone, PartialEq)]
pub struct TestSuite {
    pub name: String,
    pub counters: Counters,
    pub cases: Vec<TestCase>,
}

/// All shards sharing one `name`
#[derive(Debug, Clone, PartialEq)]
pub struct TestGroup {
    pub name: String,
    pub counters: Counters,
    pub suites: Vec<TestSuite>,
}

impl TestGroup {
    pub fn case_count(&self) -> usize {
        self.suites.iter().map(|s| s.cases.len()).sum()
    }
}

/// Merge shards into groups, keeping first-seen order
pub fn aggregate(shards: impl IntoIterator<Item = Shard>) -> Vec<TestGroup> {
    let mut groups: Vec<TestGroup> = Vec::new();

    for shard in shards {
        let idx = match groups.iter().position(|g| g.name == shard.name) {
            Some(idx) => idx,
            None => {
                groups.push(TestGroup {
                    name: shard.name.clone(),
                    counters: Counters::default(),
                    suites: Vec::new(),
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[idx];
        group.counters.add(shard.counters);

        for raw in shard.testsuites {
            match group.suites.iter_mut().find(|s| s.name == raw.name) {
                Some(suite) => {
                    suite.counters.add(raw.counters);
                    suite.cases.extend(raw.testsuite);
                }
                None => group.suites.push(TestSuite {
                    name: raw.name,
                    counters: raw.counters,
                    cases: raw.testsuite,
                }),
            }
        }
    }

    groups
}

/// Read every `*.json` shard in a directory; unparseable files are skipped
pub fn read_shards(results_dir: &Path) -> Result<Vec<Shard>> {
    let mut shards = Vec::new();
    for path in sorted_entries(results_dir)? {
        if path.extension().and_then(|e| e.to_str()) != Some("json") || !path.is_file() {
            continue;
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read shard: {:?}", path))?;
        match serde_json::from_str::<Shard>(&content) {
            Ok(shard) => shards.push(shard),
            Err(e) => {
                tracing::warn!(file = %file_name(&path), error = %e, "Skipping unreadable gtest shard");
            }
        }
    }
    Ok(shards)
}

fn case_node(case: &TestCase, weight: f64) -> ResultNode {
    let mut node = ResultNode::leaf(case.name.clone(), case.passed())
        .with_weight(weight)
        .with_num_tests(1);
    if let Some(failures) = &case.failures {
        let texts: Vec<&str> = failures.iter().map(|f| f.failure.as_str()).collect();
        node.message = Some(format!("==> {}:\n{}", case.name, texts.join("\n")));
    }
    node
}

/// Join child messages under a banner; `None` when no child has a message
fn banner(rule: &str, name: &str, children: &[ResultNode]) -> Option<String> {
    let messages: Vec<&str> = children.iter().filter_map(|c| c.message.as_deref()).collect();
    if messages.is_empty() {
        return None;
    }
    Some(format!(
        "{rule}\n    {name}\n{rule}\n{}{rule}\n\n",
        messages.join("\n")
    ))
}

fn suite_node(suite: &TestSuite, weight: f64) -> ResultNode {
    let case_weight = 1.0 / suite.cases.len() as f64;
    let children: Vec<ResultNode> = suite
        .cases
        .iter()
        .map(|case| case_node(case, case_weight))
        .collect();

    let passed = all_passed(&children);
    let message = banner(SUITE_RULE, &suite.name, &children);
    let count = children.len() as u32;
    let mut node = ResultNode::group(suite.name.clone(), children)
        .with_weight(weight)
        .with_passed(passed)
        .with_num_tests(count);
    node.message = message;
    node
}

fn group_node(group: &TestGroup, weight: f64) -> ResultNode {
    let suites: Vec<&TestSuite> = group.suites.iter().filter(|s| !s.cases.is_empty()).collect();
    if suites.is_empty() {
        return ResultNode::failure(group.name.clone(), "no test cases reported")
            .with_weight(weight)
            .with_num_tests(0);
    }

    let suite_weight = 1.0 / suites.len() as f64;
    let children: Vec<ResultNode> = suites.iter().map(|s| suite_node(s, suite_weight)).collect();

    let passed = all_passed(&children);
    let message = banner(&"=".repeat(56), &group.name, &children);
    let count = children.iter().map(ResultNode::test_count).sum();
    let mut node = ResultNode::group(group.name.clone(), children)
        .with_weight(weight)
        .with_passed(passed)
        .with_num_tests(count);
    node.message = message;
    node
}

/// Build the score tree from merged groups; `None` for an empty list
pub fn build_tree(groups: &[TestGroup]) -> Option<ResultNode> {
    match groups {
        [] => None,
        [single] => Some(group_node(single, 1.0)),
        many => {
            let weight = 1.0 / many.len() as f64;
            let children: Vec<ResultNode> = many.iter().map(|g| group_node(g, weight)).collect();
            let passed = all_passed(&children);
            let count = children.iter().map(ResultNode::test_count).sum();
            Some(
                ResultNode::group(SUMMARY_LABEL, children)
                    .with_passed(passed)
                    .with_num_tests(count),
            )
        }
    }
}

/// Load and aggregate every shard of a results directory.
///
/// `Ok(None)` when the directory does not exist; a failing summary leaf when
/// it exists but holds no readable shard.
pub fn load(results_dir: &Path) -> Result<Option<ResultNode>> {
    if !results_dir.is_dir() {
        return Ok(None);
    }

    let groups = aggregate(read_shards(results_dir)?);
    let tree = build_tree(&groups).unwrap_or_else(|| {
        ResultNode::failure(SUMMARY_LABEL, "no test reports found").with_num_tests(0)
    });
    Ok(Some(tree))
}

/// Per-group summary counters, keyed by group name
pub fn collect_metrics(results_dir: &Path) -> Result<Map<String, Value>> {
    let mut metrics = Map::new();
    if !results_dir.is_dir() {
        return Ok(metrics);
    }
    for group in aggregate(read_shards(results_dir)?) {
        metrics.insert(group.name.clone(), json!(group.counters));
    }
    Ok(metrics)
}
