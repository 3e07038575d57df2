//! Persistent result cache
//!
//! Maps submission keys to execution reports. The whole file is rewritten
//! after every fresh result (temporary sibling + rename), so an interrupted
//! batch loses at most the submission that was in flight.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GradeError, GradeResult};
use crate::score::ExecutionReport;

const CACHE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    entries: BTreeMap<String, ExecutionReport>,
}

/// Submission key to report mapping, optionally backed by a file
#[derive(Debug, Default)]
pub struct ResultCache {
    path: Option<PathBuf>,
    entries: BTreeMap<String, ExecutionReport>,
}

impl ResultCache {
    /// Cache that is never persisted
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load a cache file; a missing file starts an empty cache
    pub async fn load(path: impl Into<PathBuf>) -> GradeResult<Self> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let file: CacheFile = serde_json::from_str(&content)
                    .map_err(|e| GradeError::cache(&path, e))?;
                if file.version != CACHE_VERSION {
                    return Err(GradeError::cache(
                        &path,
                        format!("unsupported cache version {}", file.version),
                    ));
                }
                tracing::info!(
                    path = %path.display(),
                    entries = file.entries.len(),
                    "Loaded cached results"
                );
                file.entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(GradeError::cache(&path, e)),
        };

        Ok(Self {
            path: Some(path),
            entries,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&ExecutionReport> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, report: ExecutionReport) {
        self.entries.insert(key.into(), report);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite the backing file; no-op for in-memory caches
    pub async fn flush(&self) -> GradeResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let file = CacheFile {
            version: CACHE_VERSION,
            updated_at: Utc::now(),
            entries: self.entries.clone(),
        };
        let json = serde_json::to_vec(&file)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GradeError::cache(path, e))?;
        }
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| GradeError::cache(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| GradeError::cache(path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::ResultNode;
    use tempfile::TempDir;

    fn report(score: f64) -> ExecutionReport {
        let mut tree = ResultNode::group(
            "root",
            vec![
                ResultNode::leaf("a", true).with_weight(0.6),
                ResultNode::leaf("b", true).with_weight(0.2),
                ResultNode::failure("c", "boom").with_weight(0.2),
            ],
        );
        tree.calculate_score();
        ExecutionReport {
            success: true,
            stdout: "ok".into(),
            return_code: Some(0),
            test_tree: Some(tree),
            final_score: Some(score),
            total_tests: Some(3),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ResultCache::load(temp_dir.path().join("cache.json")).await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_flush_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("cache.json");

        let mut cache = ResultCache::load(&path).await.unwrap();
        cache.insert("alice", report(0.6 + 0.2));
        cache.flush().await.unwrap();
        assert!(path.is_file());
        assert!(!temp_dir.path().join("nested").join("cache.json.tmp").exists());

        let reloaded = ResultCache::load(&path).await.unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("alice"), cache.get("alice"));
    }

    #[tokio::test]
    async fn test_corrupt_cache_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache.json");
        std::fs::write(&path, "garbage").unwrap();

        let err = ResultCache::load(&path).await.unwrap_err();
        assert!(matches!(err, GradeError::Cache { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_in_memory_flush_is_noop() {
        let mut cache = ResultCache::in_memory();
        cache.insert("k", report(1.0));
        cache.flush().await.unwrap();
        assert!(cache.path().is_none());
    }
}
