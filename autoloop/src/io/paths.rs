//! Canonical locations under `.autoloop/` for a project root.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AutoloopPaths {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub ledger_path: PathBuf,
    pub artifacts_dir: PathBuf,
}

impl AutoloopPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let autoloop_dir = root.join(".autoloop");
        Self {
            config_path: autoloop_dir.join("config.toml"),
            ledger_path: autoloop_dir.join("state").join("ledger.db"),
            artifacts_dir: autoloop_dir.join("artifacts"),
            root,
        }
    }
}
