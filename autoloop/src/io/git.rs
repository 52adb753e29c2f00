//! Git adapter used for patch application and environment snapshots.
//!
//! Kept as a small, explicit wrapper around `git` subprocess calls.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::io::process::detach_from_terminal;

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    program: String,
    workdir: PathBuf,
}

impl Git {
    pub fn new(program: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Dry-run a patch file (`git apply --check`).
    #[instrument(skip_all, fields(patch = %patch.display()))]
    pub fn apply_check(&self, patch: &Path) -> Result<()> {
        let patch = patch.to_string_lossy();
        self.run_checked(&["apply", "--check", patch.as_ref()])?;
        debug!("patch applies cleanly");
        Ok(())
    }

    /// Apply a patch file to the working tree.
    #[instrument(skip_all, fields(patch = %patch.display()))]
    pub fn apply(&self, patch: &Path) -> Result<()> {
        let patch = patch.to_string_lossy();
        self.run_checked(&["apply", patch.as_ref()])?;
        debug!("patch applied");
        Ok(())
    }

    /// Return the current branch name (`HEAD` when detached).
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    pub fn head_short_sha(&self, len: usize) -> Result<String> {
        let arg = format!("--short={len}");
        let out = self.run_capture(&["rev-parse", &arg, "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// True if the worktree has staged, unstaged, or untracked changes.
    pub fn is_dirty(&self) -> Result<bool> {
        let out = self.run_capture(&["status", "--porcelain=v1"])?;
        Ok(out.lines().any(|line| !line.trim().is_empty()))
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{} {} failed: {}",
                self.program,
                args.join(" "),
                stderr.trim()
            ));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args).current_dir(&self.workdir);
        detach_from_terminal(&mut cmd);
        cmd.output()
            .with_context(|| format!("spawn {} {}", self.program, args.join(" ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{has_program, init_git_repo};
    use std::fs;

    #[test]
    fn reports_branch_sha_and_dirty_state() {
        if !has_program("git") {
            return;
        }
        let temp = tempfile::tempdir().expect("tempdir");
        init_git_repo(temp.path());
        let git = Git::new("git", temp.path());

        assert_eq!(git.current_branch().expect("branch"), "main");
        assert_eq!(git.head_short_sha(7).expect("sha").len(), 7);
        assert!(!git.is_dirty().expect("status"));

        fs::write(temp.path().join("new.txt"), "x").expect("write");
        assert!(git.is_dirty().expect("status"));
    }

    #[test]
    fn apply_check_rejects_garbage_patch() {
        if !has_program("git") {
            return;
        }
        let temp = tempfile::tempdir().expect("tempdir");
        init_git_repo(temp.path());
        let patch = temp.path().join("bad.patch");
        fs::write(&patch, "not a patch\n").expect("write");

        let err = Git::new("git", temp.path())
            .apply_check(&patch)
            .expect_err("garbage patch");
        assert!(format!("{err:#}").contains("git apply --check"));
    }
}
