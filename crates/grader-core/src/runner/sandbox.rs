//! Per-run staging directories
//!
//! Every run works on a private copy of the submission so sandboxed
//! processes never touch the original storage. The copy lives in
//! `<staging_root>/<prefix><execution id>/code` and is removed when the
//! run ends unless it is kept for debugging.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use tempfile::TempDir;
use walkdir::WalkDir;

use super::config::TesterConfig;
use crate::error::{GradeError, GradeResult};

/// Staging copy of one submission
pub struct Staging {
    /// Owned temporary directory (removed on drop)
    temp_dir: Option<TempDir>,

    /// Staging root for this execution
    root: PathBuf,

    /// Whether to keep the directory after the run
    preserve: bool,
}

impl Staging {
    /// Create the staging directory for an execution id
    pub fn create(config: &TesterConfig, execution_id: &str) -> GradeResult<Self> {
        let parent = config
            .staging_root
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&parent)
            .map_err(|e| GradeError::Staging(format!("{}: {}", parent.display(), e)))?;

        let temp_dir = tempfile::Builder::new()
            .prefix(&format!("{}{}", config.staging_prefix, execution_id))
            .rand_bytes(0)
            .tempdir_in(&parent)
            .map_err(|e| {
                GradeError::Staging(format!(
                    "cannot create staging dir for execution {}: {}",
                    execution_id, e
                ))
            })?;
        let root = temp_dir.path().to_path_buf();

        Ok(Self {
            temp_dir: Some(temp_dir),
            root,
            preserve: config.keep_staging,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the copied source tree
    pub fn code_dir(&self) -> PathBuf {
        self.root.join("code")
    }

    /// Copy a submission's source tree into the staging directory
    pub async fn populate(&self, source: &Path) -> GradeResult<()> {
        if !source.is_dir() {
            return Err(GradeError::Staging(format!(
                "submission directory not found: {}",
                source.display()
            )));
        }
        let source = source.to_path_buf();
        let target = self.code_dir();
        tokio::task::spawn_blocking(move || copy_tree(&source, &target))
            .await
            .map_err(|e| GradeError::Staging(e.to_string()))?
            .map_err(|e| GradeError::Staging(format!("{:#}", e)))?;
        Ok(())
    }

    /// End the run: remove the directory, or keep it and return its path
    pub fn finish(mut self) -> Option<PathBuf> {
        let temp_dir = self.temp_dir.take()?;
        if self.preserve {
            let path = temp_dir.keep();
            tracing::info!(path = %path.display(), "Keeping staging directory");
            return Some(path);
        }
        let path = self.root.clone();
        match temp_dir.close() {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed staging directory"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove staging directory"),
        }
        None
    }
}

/// Recursively copy `src` into `dst`, merging with existing content
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {:?}", src))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("Unexpected path {:?}", entry.path()))?;
        let target = dst.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create directory: {:?}", target))?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {:?}", entry.path()))?;
        } else {
            tracing::debug!(path = %entry.path().display(), "Skipping non-regular file");
        }
    }
    Ok(())
}

/// Rewrite `$!-KEY-!$` tokens of a file; unknown keys are left untouched.
///
/// Returns the number of replaced tokens.
pub fn replace_placeholders(path: &Path, values: &BTreeMap<String, String>) -> Result<usize> {
    let pattern = Regex::new(r"\$!-([A-Za-z0-9_]+)-!\$")?;
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;

    let mut replaced = 0;
    let rewritten = pattern.replace_all(&content, |caps: &regex::Captures<'_>| {
        match values.get(&caps[1]) {
            Some(value) => {
                replaced += 1;
                value.clone()
            }
            None => caps[0].to_string(),
        }
    });

    if replaced > 0 {
        std::fs::write(path, rewritten.as_bytes())
            .with_context(|| format!("Failed to write {:?}", path))?;
    }
    Ok(replaced)
}
