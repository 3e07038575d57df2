//! Generic JSON tree import
//!
//! Reads a report that already has the score tree shape
//! (`label` / `passed` / `weight` / `message` / `children`).

use std::path::Path;

use serde::Deserialize;

use crate::score::ResultNode;

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(default = "default_label")]
    label: String,
    #[serde(default)]
    passed: Option<bool>,
    #[serde(default = "default_weight")]
    weight: f64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    children: Vec<RawNode>,
}

fn default_label() -> String {
    "Unnamed".to_string()
}

fn default_weight() -> f64 {
    1.0
}

impl From<RawNode> for ResultNode {
    fn from(raw: RawNode) -> Self {
        let mut node = ResultNode::new(raw.label).with_weight(raw.weight);
        node.passed = raw.passed;
        node.message = raw.message;
        node.children = raw.children.into_iter().map(ResultNode::from).collect();
        node
    }
}

/// Parse a tree document from a string
pub fn parse(content: &str) -> Result<ResultNode, serde_json::Error> {
    serde_json::from_str::<RawNode>(content).map(ResultNode::from)
}

/// Load a tree document; `None` when the file does not exist
pub fn load(path: &Path) -> Option<ResultNode> {
    if !path.is_file() {
        return None;
    }

    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|content| parse(&content).map_err(|e| e.to_string()));

    match parsed {
        Ok(node) => Some(node),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Unparseable result tree");
            Some(ResultNode::failure("Error parsing results", e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_nested_tree() {
        let json = r#"{
            "label": "root",
            "children": [
                {"label": "a", "passed": true, "weight": 0.6},
                {"label": "b", "passed": true, "weight": 0.2},
                {"label": "c", "passed": false, "weight": 0.2, "message": "assert 1 == 2"}
            ]
        }"#;

        let mut root = parse(json).unwrap();
        assert_eq!(root.children.len(), 3);
        assert_eq!(root.children[2].message.as_deref(), Some("assert 1 == 2"));
        assert!((root.calculate_score() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_defaults() {
        let node = parse(r#"{"passed": true}"#).unwrap();
        assert_eq!(node.label, "Unnamed");
        assert_eq!(node.weight, 1.0);
        assert!(node.children.is_empty());
    }

    #[test]
    fn test_missing_file_is_none() {
        let temp_dir = TempDir::new().unwrap();
        assert!(load(&temp_dir.path().join("results.json")).is_none());
    }

    #[test]
    fn test_malformed_file_degrades() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("results.json");
        std::fs::write(&path, "{not json").unwrap();

        let node = load(&path).unwrap();
        assert_eq!(node.label, "Error parsing results");
        assert_eq!(node.passed, Some(false));
        assert!(node.message.is_some());
    }
}
