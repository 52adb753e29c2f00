//! Write-once artifact store under `.autoloop/artifacts/<run>/<iteration>/`.
//!
//! Each document is written to a temp file in the target directory and then
//! linked into place without clobbering, so readers never observe a partial
//! document and an existing artifact is never replaced.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Kind of document persisted per iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Plan,
    Results,
    Verdict,
    Context,
}

impl ArtifactKind {
    pub fn name(self) -> &'static str {
        match self {
            ArtifactKind::Plan => "plan",
            ArtifactKind::Results => "results",
            ArtifactKind::Verdict => "verdict",
            ArtifactKind::Context => "context",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.json", self.name())
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn iteration_dir(&self, run_id: &str, iteration: u32) -> PathBuf {
        self.dir.join(run_id).join(iteration.to_string())
    }

    pub fn path(&self, run_id: &str, iteration: u32, kind: ArtifactKind) -> PathBuf {
        self.iteration_dir(run_id, iteration).join(kind.file_name())
    }

    pub fn exists(&self, run_id: &str, iteration: u32, kind: ArtifactKind) -> bool {
        self.path(run_id, iteration, kind).exists()
    }

    /// Persist `data` as indented JSON with a trailing newline.
    ///
    /// Fails if the artifact already exists.
    pub fn write<T: Serialize>(
        &self,
        run_id: &str,
        iteration: u32,
        kind: ArtifactKind,
        data: &T,
    ) -> Result<PathBuf> {
        let dir = self.iteration_dir(run_id, iteration);
        fs::create_dir_all(&dir).with_context(|| format!("create directory {}", dir.display()))?;
        let path = dir.join(kind.file_name());

        let mut buf = serde_json::to_string_pretty(data)
            .with_context(|| format!("serialize {}", kind.name()))?;
        buf.push('\n');

        let mut tmp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("create temp file in {}", dir.display()))?;
        tmp.write_all(buf.as_bytes())
            .with_context(|| format!("write temp {}", kind.file_name()))?;
        tmp.as_file()
            .sync_all()
            .with_context(|| format!("sync temp {}", kind.file_name()))?;
        tmp.persist_noclobber(&path)
            .map_err(|err| err.error)
            .with_context(|| format!("persist artifact {}", path.display()))?;

        debug!(run_id, iteration, artifact = kind.name(), path = %path.display(), "artifact written");
        Ok(path)
    }

    pub fn read<T: DeserializeOwned>(
        &self,
        run_id: &str,
        iteration: u32,
        kind: ArtifactKind,
    ) -> Result<T> {
        let path = self.path(run_id, iteration, kind);
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
    }

    /// Remove artifacts left by an iteration that never reached the ledger.
    ///
    /// Returns true if anything was removed.
    pub fn discard_incomplete(&self, run_id: &str, iteration: u32) -> Result<bool> {
        let dir = self.iteration_dir(run_id, iteration);
        if !dir.exists() {
            return Ok(false);
        }
        warn!(run_id, iteration, dir = %dir.display(), "discarding artifacts of unfinished iteration");
        fs::remove_dir_all(&dir).with_context(|| format!("remove {}", dir.display()))?;
        Ok(true)
    }
}
