use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::{ProfileDefaults, Tester};
use crate::adapters::{find_first, gtest, metrics};
use crate::runner::config::{TesterConfig, TesterKind};
use crate::runner::sandbox::{copy_tree, replace_placeholders};
use crate::score::ResultNode;

const RUN_CMD: &str = "mkdir -p /mnt/code/results && \
    mkdir -p build && cd build && \
    cmake .. > /mnt/code/results/cmake.log 2>&1 && \
    make > /mnt/code/results/build.log 2>&1 && \
    make test > /mnt/code/results/test.log 2>&1 ; \
    cp *.json *.xml /mnt/code/results/ > /mnt/code/results/result_copy.log 2>&1 || :";

const ENTRY_POINT: &str = "main.cpp";

/// CMake projects tested with GoogleTest, one test binary per exercise
pub struct CppTester;

impl CppTester {
    /// Module directories directly under the project root, sorted
    fn list_modules(project_root: &Path) -> Result<Vec<String>> {
        let mut modules = Vec::new();
        for entry in std::fs::read_dir(project_root)
            .with_context(|| format!("Failed to list modules in {:?}", project_root))?
        {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                modules.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        modules.sort();
        Ok(modules)
    }

    /// Map `EX{n}_PATH` to the first module whose name contains `n`,
    /// falling back to the slot name
    fn module_placeholders(modules: &[String], slots: &[String]) -> BTreeMap<String, String> {
        let mut values: BTreeMap<String, String> = slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (format!("EX{}_PATH", i + 1), slot.clone()))
            .collect();

        let mut assigned = vec![false; slots.len()];
        for module in modules {
            let slot = (1..=slots.len()).find(|n| module.contains(&n.to_string()));
            if let Some(n) = slot {
                if !assigned[n - 1] {
                    assigned[n - 1] = true;
                    values.insert(format!("EX{}_PATH", n), module.clone());
                }
            }
        }
        values
    }
}

#[async_trait]
impl Tester for CppTester {
    fn kind(&self) -> TesterKind {
        TesterKind::Cpp
    }

    fn defaults(&self) -> ProfileDefaults {
        ProfileDefaults {
            image: Some("xbaro/gcc-gtest:latest".to_string()),
            timeout: Duration::from_secs(30),
            run_cmd: Some(RUN_CMD.to_string()),
            result_path: Some("/mnt/code/results".to_string()),
            detect_working_dir: true,
            code_extensions: [".c", ".h", ".cpp", ".hpp", ".hcc"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            comment_symbol: "//".to_string(),
            placeholder_file: Some("CMakeLists.txt".to_string()),
            module_slots: Some(vec!["Ex1".into(), "Ex2".into(), "Ex3".into()]),
            ..ProfileDefaults::default()
        }
    }

    /// Two levels above the first `main.cpp` (`<root>/<module>/main.cpp`)
    fn working_dir(&self, code_dir: &Path, config: &TesterConfig) -> Option<PathBuf> {
        if config.detect_working_dir != Some(true) {
            return None;
        }
        let entry = find_first(code_dir, ENTRY_POINT)?;
        entry.parent()?.parent().map(Path::to_path_buf)
    }

    async fn prepare(&self, code_dir: &Path, config: &TesterConfig) -> Result<()> {
        let (Some(project_root), Some(data_path)) =
            (self.working_dir(code_dir, config), config.data_path.as_deref())
        else {
            return Ok(());
        };

        let slots = config.module_slots.clone().unwrap_or_default();
        let modules = Self::list_modules(&project_root)?;
        if modules.is_empty() {
            tracing::warn!(root = %project_root.display(), "No modules found in project root");
        }
        let values = Self::module_placeholders(&modules, &slots);

        let data_path = data_path.to_path_buf();
        let target = project_root.clone();
        tokio::task::spawn_blocking(move || copy_tree(&data_path, &target))
            .await
            .context("Data copy task failed")??;

        if let Some(file) = &config.placeholder_file {
            let manifest = project_root.join(file);
            if manifest.is_file() {
                let count = replace_placeholders(&manifest, &values)?;
                tracing::debug!(file = %manifest.display(), count, "Rewrote build placeholders");
            }
        }
        Ok(())
    }

    fn parse_results(&self, results_dir: &Path, _config: &TesterConfig) -> Result<Option<ResultNode>> {
        gtest::load(results_dir)
    }

    fn collect_metrics(&self, results_dir: &Path, _config: &TesterConfig) -> Map<String, Value> {
        let mut collected = Map::new();
        match gtest::collect_metrics(results_dir) {
            Ok(groups) => {
                collected.insert("gtest".into(), Value::Object(groups));
            }
            Err(e) => {
                collected.insert("gtest".into(), json!({ "error": format!("{:#}", e) }));
            }
        }
        if results_dir.is_dir() {
            collected.insert(
                "memcheck".into(),
                Value::Object(metrics::collect_memcheck(results_dir)),
            );
        }
        collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project(root: &Path) -> PathBuf {
        let project = root.join("alice").join("practica");
        std::fs::create_dir_all(project.join("exercici1")).unwrap();
        std::fs::create_dir_all(project.join("ex_3")).unwrap();
        std::fs::write(project.join("exercici1").join(ENTRY_POINT), "int main(){}").unwrap();
        std::fs::write(
            project.join("CMakeLists.txt"),
            "add_subdirectory($!-EX1_PATH-!$)\nadd_subdirectory($!-EX2_PATH-!$)\nadd_subdirectory($!-EX3_PATH-!$)\n",
        )
        .unwrap();
        project
    }

    #[test]
    fn test_working_dir_is_project_root() {
        let temp_dir = TempDir::new().unwrap();
        let project = project(temp_dir.path());
        let config = TesterConfig::for_kind(TesterKind::Cpp);

        assert_eq!(CppTester.working_dir(temp_dir.path(), &config), Some(project));
    }

    #[tokio::test]
    async fn test_prepare_copies_data_and_rewrites_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let project = project(temp_dir.path());
        let data = TempDir::new().unwrap();
        std::fs::create_dir_all(data.path().join("tests")).unwrap();
        std::fs::write(data.path().join("tests/test_ex1.cpp"), "TEST(A, B) {}").unwrap();

        let config = TesterConfig::for_kind(TesterKind::Cpp).with_data_path(data.path());
        CppTester.prepare(temp_dir.path(), &config).await.unwrap();

        assert!(project.join("tests/test_ex1.cpp").is_file());
        let manifest = std::fs::read_to_string(project.join("CMakeLists.txt")).unwrap();
        assert_eq!(
            manifest,
            "add_subdirectory(exercici1)\nadd_subdirectory(Ex2)\nadd_subdirectory(ex_3)\n"
        );
    }

    #[test]
    fn test_module_placeholders() {
        let slots: Vec<String> = vec!["Ex1".into(), "Ex2".into(), "Ex3".into()];
        let modules: Vec<String> = vec!["ex1_draft".into(), "ex1_final".into(), "part3".into()];

        let values = CppTester::module_placeholders(&modules, &slots);
        assert_eq!(values["EX1_PATH"], "ex1_draft");
        assert_eq!(values["EX2_PATH"], "Ex2");
        assert_eq!(values["EX3_PATH"], "part3");

        let values = CppTester::module_placeholders(&[], &slots);
        assert_eq!(values["EX1_PATH"], "Ex1");
    }

    #[test]
    fn test_list_modules_skips_files() {
        let temp_dir = TempDir::new().unwrap();
        let project = project(temp_dir.path());
        std::fs::write(project.join("README.md"), "notes").unwrap();

        let modules = CppTester::list_modules(&project).unwrap();
        assert_eq!(modules, vec!["ex_3", "exercici1"]);

        let empty = TempDir::new().unwrap();
        assert!(CppTester::list_modules(empty.path()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prepare_without_data_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let project = project(temp_dir.path());
        let config = TesterConfig::for_kind(TesterKind::Cpp);

        CppTester.prepare(temp_dir.path(), &config).await.unwrap();
        let manifest = std::fs::read_to_string(project.join("CMakeLists.txt")).unwrap();
        assert!(manifest.contains("$!-EX1_PATH-!$"));
    }
}
