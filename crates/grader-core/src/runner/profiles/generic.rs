use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use super::{ProfileDefaults, Tester};
use crate::adapters::tree_json;
use crate::runner::config::{TesterConfig, TesterKind};
use crate::score::ResultNode;

/// Any command that writes a ready-made result tree as JSON
pub struct GenericTester;

#[async_trait]
impl Tester for GenericTester {
    fn kind(&self) -> TesterKind {
        TesterKind::Generic
    }

    fn defaults(&self) -> ProfileDefaults {
        ProfileDefaults::default()
    }

    fn parse_results(&self, results_dir: &Path, config: &TesterConfig) -> Result<Option<ResultNode>> {
        let file = match config.grading_file.as_deref() {
            Some(name) => results_dir.join(name),
            None => results_dir.to_path_buf(),
        };
        Ok(tree_json::load(&file))
    }
}
