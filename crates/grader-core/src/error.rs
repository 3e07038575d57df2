//! Error types for the grading core
//!
//! Report parsing problems never show up here: adapters turn them into failing
//! result nodes. What remains are failures of the sandbox runtime itself,
//! staging and cache I/O, and configuration mistakes that must stop a run
//! before any submission is graded.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for grading operations
pub type GradeResult<T> = Result<T, GradeError>;

/// Main error type for the grading core
#[derive(Error, Debug)]
pub enum GradeError {
    /// The tester configuration is unusable
    #[error("Invalid grading configuration: {0}")]
    InvalidConfig(String),

    /// Export target exists and overwriting was not requested
    #[error("Export target already exists: {} (set overwrite to replace it)", .0.display())]
    ExportExists(PathBuf),

    /// The container runtime could not be started
    #[error("Failed to start sandbox runtime `{runtime}`: {source}")]
    SandboxSpawn {
        runtime: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the sandbox process failed
    #[error("Sandbox process wait failed: {0}")]
    SandboxWait(#[source] std::io::Error),

    /// Preparing the per-run staging copy failed
    #[error("Staging failed: {0}")]
    Staging(String),

    /// The persisted result cache could not be read or written
    #[error("Result cache error at {}: {message}", path.display())]
    Cache { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl GradeError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a cache error for the given file
    pub fn cache(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::Cache {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error aborts a whole batch rather than a single submission
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GradeError::InvalidConfig(_) | GradeError::ExportExists(_) | GradeError::Cache { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(GradeError::config("no image").is_fatal());
        assert!(GradeError::ExportExists(PathBuf::from("out.csv")).is_fatal());
        assert!(GradeError::cache("cache.json", "bad json").is_fatal());

        let spawn = GradeError::SandboxSpawn {
            runtime: "docker".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(!spawn.is_fatal());
        assert!(spawn.to_string().contains("docker"));
    }
}
