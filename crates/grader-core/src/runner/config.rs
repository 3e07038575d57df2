//! Tester configuration
//!
//! Configuration options for one sandboxed grading run. Fields left unset
//! are filled from the selected ecosystem profile (see
//! [`ProfileDefaults`](super::ProfileDefaults)).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::profiles::ProfileDefaults;
use crate::error::{GradeError, GradeResult};

/// Ecosystem discriminator resolved through the tester registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TesterKind {
    /// Any command writing a generic JSON result tree
    #[default]
    Generic,
    /// pytest + coverage + flake8
    #[serde(alias = "pytest")]
    Python,
    /// CMake + GoogleTest
    #[serde(alias = "gtest")]
    Cpp,
    /// Maven + JUnit + jacoco + checkstyle
    #[serde(alias = "junit")]
    Java,
}

impl TesterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TesterKind::Generic => "generic",
            TesterKind::Python => "python",
            TesterKind::Cpp => "cpp",
            TesterKind::Java => "java",
        }
    }
}

impl fmt::Display for TesterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TesterKind {
    type Err = GradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generic" => Ok(TesterKind::Generic),
            "python" | "pytest" => Ok(TesterKind::Python),
            "cpp" | "c++" | "gtest" => Ok(TesterKind::Cpp),
            "java" | "junit" => Ok(TesterKind::Java),
            other => Err(GradeError::config(format!("unknown tester kind '{}'", other))),
        }
    }
}

/// How the run command is launched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SandboxRuntime {
    /// External container engine (`docker`, `podman`...)
    Container {
        #[serde(default = "default_program")]
        program: String,
        #[serde(default = "default_shell")]
        shell: String,
    },
    /// Host shell, no isolation; for development and tests
    Local {
        #[serde(default = "default_shell")]
        shell: String,
    },
}

fn default_program() -> String {
    "docker".to_string()
}

fn default_shell() -> String {
    "bash".to_string()
}

impl Default for SandboxRuntime {
    fn default() -> Self {
        SandboxRuntime::Container {
            program: default_program(),
            shell: default_shell(),
        }
    }
}

impl SandboxRuntime {
    pub fn local() -> Self {
        SandboxRuntime::Local {
            shell: "sh".to_string(),
        }
    }

    pub fn shell(&self) -> &str {
        match self {
            SandboxRuntime::Container { shell, .. } | SandboxRuntime::Local { shell } => shell,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, SandboxRuntime::Container { .. })
    }
}

/// Additional bind mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Host path
    pub source: PathBuf,
    /// Path inside the sandbox
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

impl Mount {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    /// `-v` argument of the container command line
    pub fn volume_arg(&self) -> String {
        let mut arg = format!("{}:{}", self.source.display(), self.target);
        if self.read_only {
            arg.push_str(":ro");
        }
        arg
    }
}

/// Configuration for a sandboxed grading run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TesterConfig {
    /// Ecosystem profile
    #[serde(default)]
    pub kind: TesterKind,

    /// Launch mechanism
    #[serde(default)]
    pub runtime: SandboxRuntime,

    /// Sandbox image reference
    #[serde(default)]
    pub image: Option<String>,

    /// Wall-clock budget (e.g. `30s`, `2m`)
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Shell command executed inside the sandbox
    #[serde(default)]
    pub run_cmd: Option<String>,

    /// Results directory inside the sandbox; its base name is looked up in the staging copy
    #[serde(default)]
    pub result_path: Option<String>,

    /// Result file inside the results directory (generic tree import)
    #[serde(default)]
    pub grading_file: Option<String>,

    /// Where the staging copy is mounted
    #[serde(default = "default_container_mount")]
    pub container_mount: String,

    /// Shared grading fixtures, mounted read-only
    #[serde(default)]
    pub data_path: Option<PathBuf>,

    #[serde(default = "default_data_mount")]
    pub data_mount: String,

    /// Extra mounts
    #[serde(default)]
    pub mounts: Vec<Mount>,

    /// Search the staging copy for the project root
    #[serde(default)]
    pub detect_working_dir: Option<bool>,

    /// Parent of the staging directories (system temp dir when unset)
    #[serde(default)]
    pub staging_root: Option<PathBuf>,

    #[serde(default = "default_staging_prefix")]
    pub staging_prefix: String,

    /// Keep the staging copy for debugging
    #[serde(default)]
    pub keep_staging: bool,

    /// Fixed execution id (random per run when unset)
    #[serde(default)]
    pub execution_id: Option<String>,

    /// Run the qualitative analyzer when one is attached
    #[serde(default = "default_perform_analysis")]
    pub perform_analysis: bool,

    /// One analysis per module directory instead of one combined text
    #[serde(default)]
    pub analysis_per_module: bool,

    /// Source extensions given to the analyzer
    #[serde(default)]
    pub code_extensions: Option<Vec<String>>,

    /// Line comment marker used in source banners
    #[serde(default)]
    pub comment_symbol: Option<String>,

    /// Character budget of extracted source text
    #[serde(default = "default_max_source_chars")]
    pub max_source_chars: usize,

    /// Build manifest whose placeholders are rewritten before the run
    #[serde(default)]
    pub placeholder_file: Option<String>,

    /// Default module names bound to `EX{n}_PATH` placeholders
    #[serde(default)]
    pub module_slots: Option<Vec<String>>,
}

fn default_container_mount() -> String {
    "/mnt/code".to_string()
}

fn default_data_mount() -> String {
    "/mnt/data".to_string()
}

fn default_staging_prefix() -> String {
    "submission_".to_string()
}

fn default_perform_analysis() -> bool {
    true
}

fn default_max_source_chars() -> usize {
    12000
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            kind: TesterKind::default(),
            runtime: SandboxRuntime::default(),
            image: None,
            timeout: None,
            run_cmd: None,
            result_path: None,
            grading_file: None,
            container_mount: default_container_mount(),
            data_path: None,
            data_mount: default_data_mount(),
            mounts: Vec::new(),
            detect_working_dir: None,
            staging_root: None,
            staging_prefix: default_staging_prefix(),
            keep_staging: false,
            execution_id: None,
            perform_analysis: default_perform_analysis(),
            analysis_per_module: false,
            code_extensions: None,
            comment_symbol: None,
            max_source_chars: default_max_source_chars(),
            placeholder_file: None,
            module_slots: None,
        }
    }
}

impl TesterConfig {
    /// Config for a profile with its defaults applied
    pub fn for_kind(kind: TesterKind) -> Self {
        let mut config = Self {
            kind,
            ..Default::default()
        };
        config.apply_defaults(&super::profiles::resolve(kind).defaults());
        config
    }

    /// Load from YAML (`.yaml`/`.yml`) or JSON
    pub fn from_file(path: impl AsRef<Path>) -> GradeResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if is_yaml {
            serde_yaml::from_str(&content)
                .map_err(|e| GradeError::config(format!("{}: {}", path.display(), e)))
        } else {
            serde_json::from_str(&content)
                .map_err(|e| GradeError::config(format!("{}: {}", path.display(), e)))
        }
    }

    /// Fill unset fields from profile defaults
    pub fn apply_defaults(&mut self, defaults: &ProfileDefaults) {
        fn fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if slot.is_none() {
                *slot = value.clone();
            }
        }

        fill(&mut self.image, &defaults.image);
        fill(&mut self.timeout, &Some(defaults.timeout));
        fill(&mut self.run_cmd, &defaults.run_cmd);
        fill(&mut self.result_path, &defaults.result_path);
        fill(&mut self.grading_file, &defaults.grading_file);
        fill(&mut self.detect_working_dir, &Some(defaults.detect_working_dir));
        fill(&mut self.code_extensions, &Some(defaults.code_extensions.clone()));
        fill(&mut self.comment_symbol, &Some(defaults.comment_symbol.clone()));
        fill(&mut self.placeholder_file, &defaults.placeholder_file);
        fill(&mut self.module_slots, &defaults.module_slots);
        if self.mounts.is_empty() {
            self.mounts = defaults.mounts.clone();
        }
    }

    /// Check the fields every run needs
    pub fn validate(&self) -> GradeResult<()> {
        if self.runtime.is_container() && self.image.as_deref().is_none_or(str::is_empty) {
            return Err(GradeError::config("image is required for container runs"));
        }
        if self.run_cmd.as_deref().is_none_or(|c| c.trim().is_empty()) {
            return Err(GradeError::config("run_cmd is required"));
        }
        if self.result_path.as_deref().is_none_or(str::is_empty) {
            return Err(GradeError::config("result_path is required"));
        }
        if self.timeout.is_none_or(|t| t.is_zero()) {
            return Err(GradeError::config("timeout must be greater than zero"));
        }
        if self.runtime.shell().is_empty() {
            return Err(GradeError::config("runtime shell is empty"));
        }
        Ok(())
    }

    pub fn with_runtime(mut self, runtime: SandboxRuntime) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_run_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.run_cmd = Some(cmd.into());
        self
    }

    pub fn with_result_path(mut self, path: impl Into<String>) -> Self {
        self.result_path = Some(path.into());
        self
    }

    pub fn with_grading_file(mut self, file: impl Into<String>) -> Self {
        self.grading_file = Some(file.into());
        self
    }

    pub fn with_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = Some(path.into());
        self
    }

    pub fn with_mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = Some(root.into());
        self
    }

    pub fn with_execution_id(mut self, id: impl Into<String>) -> Self {
        self.execution_id = Some(id.into());
        self
    }

    pub fn with_analysis(mut self, enabled: bool, per_module: bool) -> Self {
        self.perform_analysis = enabled;
        self.analysis_per_module = per_module;
        self
    }

    /// Retain the staging copy after the run
    pub fn keep_staging(mut self) -> Self {
        self.keep_staging = true;
        self
    }

    /// Effective time budget
    pub fn time_budget(&self) -> Duration {
        self.timeout.unwrap_or(Duration::from_secs(10))
    }

    /// Base name of the results directory, looked up inside the staging copy
    pub fn results_dir_name(&self) -> &str {
        let path = self.result_path.as_deref().unwrap_or_default();
        path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
    }

    pub fn code_extensions(&self) -> &[String] {
        self.code_extensions.as_deref().unwrap_or_default()
    }

    pub fn comment_symbol(&self) -> &str {
        self.comment_symbol.as_deref().unwrap_or("#")
    }
}
