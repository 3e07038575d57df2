//! Qualitative analysis collaborator
//!
//! The grading core only extracts source text and hands it to an external
//! [`CodeAnalyzer`] (typically an LLM reviewer). What the analyzer returns is
//! attached verbatim to the report.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use walkdir::WalkDir;

use super::config::TesterConfig;

/// External reviewer of submitted source code
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CodeAnalyzer: Send + Sync {
    /// Review the annotated source text of a submission or module
    async fn analyze(&self, source: &str) -> Result<String>;
}

/// Collects annotated source text under a character budget
#[derive(Debug, Clone)]
pub struct SourceExtractor {
    extensions: Vec<String>,
    comment_symbol: String,
    /// Zero disables the budget
    max_chars: usize,
}

impl SourceExtractor {
    pub fn new(extensions: Vec<String>, comment_symbol: impl Into<String>, max_chars: usize) -> Self {
        Self {
            extensions,
            comment_symbol: comment_symbol.into(),
            max_chars,
        }
    }

    pub fn from_config(config: &TesterConfig) -> Self {
        Self::new(
            config.code_extensions().to_vec(),
            config.comment_symbol(),
            config.max_source_chars,
        )
    }

    fn matches(&self, path: &Path) -> bool {
        let name = path.to_string_lossy();
        self.extensions.iter().any(|ext| name.ends_with(ext.as_str()))
    }

    /// Concatenate matching files below `root`, walking in name order.
    ///
    /// A file that would push the total over the budget is skipped; later
    /// (smaller) files may still fit.
    pub fn extract(&self, root: &Path) -> String {
        let mut sections = Vec::new();
        let mut total = 0usize;

        for entry in WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if !self.matches(path) {
                continue;
            }
            let code = match std::fs::read(path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to read source file");
                    continue;
                }
            };
            let len = code.chars().count();
            if self.max_chars > 0 && total + len > self.max_chars {
                continue;
            }

            let shown = path.strip_prefix(root).unwrap_or(path).display();
            let sym = &self.comment_symbol;
            sections.push(format!(
                "\n{sym} --- START FILE: {shown} ---\n{code}\n{sym} --- END FILE: {shown} ---\n"
            ));
            total += len;
        }

        sections.join("\n")
    }

    /// One extract per immediate sub-directory of `root`
    pub fn extract_modules(&self, root: &Path) -> BTreeMap<String, String> {
        let mut modules = BTreeMap::new();
        let Ok(entries) = std::fs::read_dir(root) else {
            return modules;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                let name = entry.file_name().to_string_lossy().into_owned();
                modules.insert(name, self.extract(&path));
            }
        }
        modules
    }
}
