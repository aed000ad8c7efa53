//! Directory layout of a step-loop root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::io::config::OrchestratorConfig;

pub const CONFIG_FILE: &str = "orchestrator.toml";

/// All canonical paths for a loop root, resolved from the config.
#[derive(Debug, Clone)]
pub struct LoopPaths {
    pub root: PathBuf,
    pub workspace_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub steps_dir: PathBuf,
    pub done_target: PathBuf,
}

impl LoopPaths {
    pub fn new(root: impl Into<PathBuf>, cfg: &OrchestratorConfig) -> Self {
        let root = root.into();
        let workspace_dir = root.join(&cfg.workspace_dir);
        let logs_dir = root.join(&cfg.logs_dir);
        Self {
            steps_dir: logs_dir.join("steps"),
            done_target: workspace_dir.join(&cfg.done.target),
            workspace_dir,
            logs_dir,
            root,
        }
    }

    /// Default config location for a root.
    pub fn config_path(root: &Path) -> PathBuf {
        root.join(CONFIG_FILE)
    }
}

/// Create the workspace and log directories the loop writes into.
pub fn ensure_layout(paths: &LoopPaths) -> Result<()> {
    let dirs = [
        paths.workspace_dir.join("generated"),
        paths.workspace_dir.join("results"),
        paths.workspace_dir.join("artifacts"),
        paths.steps_dir.clone(),
    ];
    for dir in &dirs {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }
    Ok(())
}
