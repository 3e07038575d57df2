use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{ProfileDefaults, Tester};
use crate::adapters::pytest;
use crate::runner::config::{TesterConfig, TesterKind};
use crate::score::ResultNode;

const RUN_CMD: &str = "cd /mnt/code && \
    mkdir -p results && \
    pytest --json-report --json-report-file=results/test_report.json > results/pytest.out 2>&1; \
    coverage run -m pytest > /dev/null 2>&1; \
    coverage json -o results/coverage.json; \
    flake8 . --format=json --output-file results/flake8.json";

/// pytest-json-report, coverage.py and flake8
pub struct PythonTester;

#[async_trait]
impl Tester for PythonTester {
    fn kind(&self) -> TesterKind {
        TesterKind::Python
    }

    fn defaults(&self) -> ProfileDefaults {
        ProfileDefaults {
            image: Some("python-grader:latest".to_string()),
            timeout: Duration::from_secs(30),
            run_cmd: Some(RUN_CMD.to_string()),
            result_path: Some("/mnt/code/results".to_string()),
            grading_file: Some(pytest::TEST_REPORT_FILE.to_string()),
            code_extensions: vec![".py".to_string()],
            ..ProfileDefaults::default()
        }
    }

    fn parse_results(&self, results_dir: &Path, _config: &TesterConfig) -> Result<Option<ResultNode>> {
        Ok(pytest::load(results_dir))
    }

    fn collect_metrics(&self, results_dir: &Path, _config: &TesterConfig) -> Map<String, Value> {
        pytest::collect_metrics(results_dir)
    }
}
