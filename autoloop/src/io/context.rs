//! Best-effort snapshot of the environment an iteration ran in.
//!
//! Purely observational: every field is optional and a failure to read one
//! never aborts the iteration.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::Timestamp;
use crate::io::git::Git;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvSnapshot {
    pub captured_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_head: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_dirty: Option<bool>,
}

impl EnvSnapshot {
    pub fn capture(workdir: &Path, git: &Git) -> Self {
        let cwd = workdir
            .canonicalize()
            .ok()
            .map(|p| p.display().to_string());
        let git_branch = git
            .current_branch()
            .inspect_err(|err| debug!(err = %err, "snapshot: no git branch"))
            .ok();
        let git_head = git.head_short_sha(12).ok();
        let git_dirty = git.is_dirty().ok();
        Self {
            captured_at: Utc::now(),
            cwd,
            git_branch,
            git_head,
            git_dirty,
        }
    }
}
