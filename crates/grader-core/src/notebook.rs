//! Notebook test-cell tracking
//!
//! A notebook kernel client reports cell events through callbacks. Each
//! submission run owns one [`NotebookRunContext`]; test cells are the ones
//! tagged `TEST` together with a `TEST_<name>` tag. Nothing here executes
//! notebooks, it only records what the client reports and turns it into a
//! score tree.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::score::ResultNode;

const TEST_TAG: &str = "TEST";
const TEST_NAME_PREFIX: &str = "TEST_";
const ASSERTION_ERROR: &str = "AssertionError";

/// Content of a kernel `execute_reply` message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteReply {
    pub status: String,
    #[serde(default)]
    pub ename: Option<String>,
    #[serde(default)]
    pub evalue: Option<String>,
    #[serde(default)]
    pub traceback: Vec<String>,
}

impl ExecuteReply {
    pub fn ok() -> Self {
        Self {
            status: "ok".into(),
            ..Default::default()
        }
    }

    pub fn error(ename: impl Into<String>, traceback: Vec<String>) -> Self {
        Self {
            status: "error".into(),
            ename: Some(ename.into()),
            traceback,
            ..Default::default()
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// State of one test cell
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellTest {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub passed: bool,
    /// Joined traceback of a non-assertion error
    pub error: Option<String>,
}

/// Test name of a notebook cell, if it is a test cell
pub fn cell_test_name(cell: &Value) -> Option<String> {
    let tags: Vec<&str> = cell
        .pointer("/metadata/tags")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(Value::as_str)
        .collect();
    if !tags.contains(&TEST_TAG) {
        return None;
    }
    tags.iter()
        .rev()
        .find_map(|t| t.strip_prefix(TEST_NAME_PREFIX))
        .map(str::to_string)
}

/// Test cells of a reference notebook (nbformat 4 JSON)
pub fn test_cells(notebook: &Value) -> Vec<Value> {
    notebook
        .get("cells")
        .and_then(Value::as_array)
        .map(|cells| {
            cells
                .iter()
                .filter(|c| cell_test_name(c).is_some())
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// Append the reference test cells to a submitted notebook
pub fn append_test_cells(notebook: &mut Value, reference: &Value) -> usize {
    let cells = test_cells(reference);
    let count = cells.len();
    if let Some(target) = notebook.get_mut("cells").and_then(Value::as_array_mut) {
        target.extend(cells);
        count
    } else {
        0
    }
}

/// Per-run accumulator for notebook cell events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotebookRunContext {
    pub name: String,
    pub tests: BTreeMap<String, CellTest>,
    pub num_test: usize,
    pub num_passed: usize,
    pub num_failed: usize,
    pub num_error: usize,
}

impl NotebookRunContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn on_cell_start(&mut self, cell: &Value, _cell_index: usize) {
        let Some(name) = cell_test_name(cell) else {
            return;
        };
        self.tests.insert(
            name,
            CellTest {
                start: Some(Utc::now()),
                ..Default::default()
            },
        );
        self.num_test += 1;
    }

    pub fn on_cell_error(&mut self, cell: &Value, _cell_index: usize, reply: &ExecuteReply) {
        let Some(name) = cell_test_name(cell) else {
            return;
        };
        let test = self.tests.entry(name.clone()).or_default();
        if reply.ename.as_deref() == Some(ASSERTION_ERROR) {
            test.status = Some("failed".into());
            self.num_failed += 1;
        } else {
            test.error = Some(reply.traceback.join("\n"));
            self.num_error += 1;
        }
        tracing::debug!(test = %name, ename = ?reply.ename, "Notebook test cell raised");
    }

    pub fn on_cell_executed(&mut self, cell: &Value, _cell_index: usize, reply: &ExecuteReply) {
        let Some(name) = cell_test_name(cell) else {
            return;
        };
        let test = self.tests.entry(name).or_default();
        test.end = Some(Utc::now());
        test.status = Some(reply.status.clone());
        test.passed = reply.is_ok();
        if reply.is_ok() {
            self.num_passed += 1;
        }
    }

    /// One leaf per test cell, weight `1/N`
    pub fn into_tree(self) -> ResultNode {
        let weight = if self.tests.is_empty() {
            0.0
        } else {
            1.0 / self.tests.len() as f64
        };
        let children: Vec<ResultNode> = self
            .tests
            .into_iter()
            .map(|(name, test)| {
                let mut leaf = ResultNode::leaf(name, test.passed)
                    .with_weight(weight)
                    .with_num_tests(1);
                if let Some(error) = test.error {
                    leaf = leaf.with_message(error);
                } else if !test.passed {
                    leaf = leaf.with_message("assertion failed");
                }
                leaf
            })
            .collect();

        if children.is_empty() {
            return ResultNode::failure(self.name, "no test cells executed");
        }
        ResultNode::group(self.name, children)
    }
}
