//! Weighted hierarchical result tree
//!
//! A [`ResultNode`] is either a leaf carrying a pass/fail verdict or an
//! internal node whose score is the weighted sum of its children's scores.
//! Sibling weights are used as given and never renormalized, so weights that
//! do not sum to 1 at a level push the parent score outside `[0, 1]`. Callers
//! choose weights on purpose (e.g. 0.6/0.2/0.2 for tests/coverage/linting).

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

fn default_weight() -> f64 {
    1.0
}

/// Round to two decimals, the precision used by every exported score
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One node of a score tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultNode {
    /// Display label (test name, suite name, module name...)
    pub label: String,

    /// Verdict; `None` means not evaluated or not a leaf
    #[serde(default)]
    pub passed: Option<bool>,

    /// Contribution to the parent score
    #[serde(default = "default_weight")]
    pub weight: f64,

    /// Diagnostic text such as a failure trace
    #[serde(default)]
    pub message: Option<String>,

    /// Ordered children; empty for leaves
    #[serde(default)]
    pub children: Vec<ResultNode>,

    /// Cached result of [`ResultNode::calculate_score`]
    #[serde(default)]
    pub score: f64,

    /// Number of test cases below this node, when the adapter counts them
    #[serde(default)]
    pub num_tests: Option<u32>,
}

impl ResultNode {
    /// Create a node with default weight and no verdict
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            passed: None,
            weight: default_weight(),
            message: None,
            children: Vec::new(),
            score: 0.0,
            num_tests: None,
        }
    }

    /// Create a leaf with a verdict
    pub fn leaf(label: impl Into<String>, passed: bool) -> Self {
        Self::new(label).with_passed(passed)
    }

    /// Create a failing leaf carrying a diagnostic message
    pub fn failure(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::leaf(label, false).with_message(message)
    }

    /// Create an internal node from its children
    pub fn group(label: impl Into<String>, children: Vec<ResultNode>) -> Self {
        Self {
            children,
            ..Self::new(label)
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_passed(mut self, passed: bool) -> Self {
        self.passed = Some(passed);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_num_tests(mut self, num_tests: u32) -> Self {
        self.num_tests = Some(num_tests);
        self
    }

    /// Append a child node
    pub fn push(&mut self, child: ResultNode) {
        self.children.push(child);
    }

    /// Whether this node has no children
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Whether the node has a positive verdict
    pub fn is_passed(&self) -> bool {
        self.passed == Some(true)
    }

    /// Compute and cache scores bottom-up, returning this node's score.
    ///
    /// A leaf scores `1.0` only when `passed` is `Some(true)`; a missing
    /// verdict counts as a failure. Internal nodes score
    /// `sum(child.score * child.weight)`. Repeated calls yield the same values.
    pub fn calculate_score(&mut self) -> f64 {
        self.score = if self.children.is_empty() {
            if self.is_passed() { 1.0 } else { 0.0 }
        } else {
            self.children
                .iter_mut()
                .map(|child| child.calculate_score() * child.weight)
                .sum()
        };
        self.score
    }

    /// Number of test cases represented by this node.
    ///
    /// Uses the adapter-provided count when present, otherwise counts leaves.
    pub fn test_count(&self) -> u32 {
        match self.num_tests {
            Some(count) => count,
            None if self.children.is_empty() => 1,
            None => self.children.iter().map(ResultNode::test_count).sum(),
        }
    }

    /// Export representation: scores rounded to two decimals, children always a list
    pub fn to_dict(&self) -> Value {
        json!({
            "label": self.label,
            "passed": self.passed,
            "weight": self.weight,
            "message": self.message,
            "score": round2(self.score),
            "children": self.children.iter().map(ResultNode::to_dict).collect::<Vec<_>>(),
        })
    }
}

/// Logical AND of the children's verdicts; an empty list counts as passed
pub fn all_passed(children: &[ResultNode]) -> bool {
    children.iter().all(ResultNode::is_passed)
}
