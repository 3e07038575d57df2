//! Report format adapters
//!
//! Each adapter turns the native report of one tool ecosystem into a
//! [`ResultNode`](crate::score::ResultNode) tree. Adapters return `Ok(None)`
//! when the expected report location does not exist, and a failing
//! diagnostic node when a report exists but cannot be parsed. Only
//! unexpected I/O errors on an existing directory are propagated.

pub mod gtest;
pub mod junit;
pub mod metrics;
pub mod pytest;
pub mod tree_json;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Depth-first search for the first file with the given name
pub fn find_first(base: &Path, file_name: &str) -> Option<PathBuf> {
    WalkDir::new(base)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file() && e.file_name() == file_name)
        .map(|e| e.into_path())
}

/// Entries of a directory sorted by file name
pub(crate) fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("Failed to read directory: {:?}", dir))?
    {
        let entry = entry.with_context(|| format!("Failed to read entry in {:?}", dir))?;
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

/// File name of a path as an owned string
pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
