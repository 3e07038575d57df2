use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::{ProfileDefaults, Tester};
use crate::adapters::{junit, metrics};
use crate::runner::config::{Mount, TesterConfig, TesterKind};
use crate::score::ResultNode;

const RUN_CMD: &str = r#"PROJECTS=($(find . -name pom.xml -printf "%d %p\n" | sort -n | perl -pe 's/^\d+\s//;' | xargs dirname)) && PROJECT_DIR=${PROJECTS[0]} && cd $PROJECT_DIR && mkdir -p /mnt/code/results && mvn clean org.jacoco:jacoco-maven-plugin:0.8.13:prepare-agent test org.jacoco:jacoco-maven-plugin:0.8.13:report checkstyle:checkstyle > /mnt/code/results/maven_output.log 2>&1 ; find . -type d -name surefire-reports | while read dir; do MOD_PATH=$(dirname $(dirname "$dir")); MOD_NAME=$(basename "$MOD_PATH"); mkdir -p /mnt/code/results/surefire-reports/$MOD_NAME; cp "$dir"/*.xml /mnt/code/results/surefire-reports/$MOD_NAME/. 2>/dev/null || true; find "$MOD_PATH" -name jacoco.xml -exec cp {} /mnt/code/results/surefire-reports/$MOD_NAME/. \; ; find "$MOD_PATH" -name checkstyle-result.xml -exec cp {} /mnt/code/results/surefire-reports/$MOD_NAME/. \; ; done"#;

const MAVEN_CACHE: &str = "/tmp/maven_cache";

/// Maven builds with surefire, jacoco and checkstyle reports per module
pub struct JavaTester;

#[async_trait]
impl Tester for JavaTester {
    fn kind(&self) -> TesterKind {
        TesterKind::Java
    }

    fn defaults(&self) -> ProfileDefaults {
        ProfileDefaults {
            image: Some("maven:latest".to_string()),
            timeout: Duration::from_secs(30),
            run_cmd: Some(RUN_CMD.to_string()),
            result_path: Some("/mnt/code/results".to_string()),
            code_extensions: vec![".java".to_string()],
            comment_symbol: "//".to_string(),
            mounts: vec![Mount::new(MAVEN_CACHE, "/root/.m2/repository")],
            ..ProfileDefaults::default()
        }
    }

    /// Create host directories of extra mounts (the shared maven cache)
    async fn prepare(&self, _code_dir: &Path, config: &TesterConfig) -> Result<()> {
        if !config.runtime.is_container() {
            return Ok(());
        }
        for mount in &config.mounts {
            tokio::fs::create_dir_all(&mount.source)
                .await
                .with_context(|| format!("Failed to create mount source {:?}", mount.source))?;
        }
        Ok(())
    }

    fn parse_results(&self, results_dir: &Path, _config: &TesterConfig) -> Result<Option<ResultNode>> {
        junit::load(results_dir)
    }

    fn collect_metrics(&self, results_dir: &Path, _config: &TesterConfig) -> Map<String, Value> {
        match metrics::collect_java(&results_dir.join(junit::REPORTS_DIR)) {
            Ok(collected) => collected,
            Err(e) => {
                let mut collected = Map::new();
                collected.insert("metrics_error".into(), json!(format!("{:#}", e)));
                collected
            }
        }
    }
}
