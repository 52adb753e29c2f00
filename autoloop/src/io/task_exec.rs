//! Task Executor: runs one task against the local environment.
//!
//! There are two result channels. `Ok(outcome)` is a task that ran to a
//! documented end, where `outcome.ok == false` is a logical failure (missing
//! match, disallowed command, tool not installed). `Err(_)` is an unexpected
//! fault (I/O error, spawn failure, patch rejected) that the retry coordinator
//! may retry.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::allowlist::CommandAllowlist;
use crate::core::text::{output_text, truncate_utf8};
use crate::core::types::{
    ApplyPatchInputs, CommandRun, CommandRuns, EditFileInputs, FileContent, GrepInputs,
    ListFilesInputs, ReadFileInputs, ShellInputs, Task, TaskOp, TaskOutcome, TaskOutput,
    Timestamp, VerifyInputs, WriteFileInputs,
};
use crate::io::config::AutoloopConfig;
use crate::io::git::Git;
use crate::io::process::run_command_with_timeout;
use crate::io::ripgrep::{Ripgrep, ToolOutcome};

/// Executes a single task.
pub trait TaskRunner {
    fn run(&self, task: &Task) -> Result<TaskOutcome>;
}

/// Task runner that acts on the filesystem rooted at `workdir`.
#[derive(Debug, Clone)]
pub struct LocalTaskRunner {
    workdir: PathBuf,
    allowlist: CommandAllowlist,
    verify_defaults: Vec<String>,
    command_timeout: Duration,
    output_limit_bytes: usize,
    ripgrep: Ripgrep,
    git: Git,
}

impl LocalTaskRunner {
    pub fn new(workdir: impl Into<PathBuf>, cfg: &AutoloopConfig) -> Self {
        let workdir = workdir.into();
        Self {
            allowlist: cfg.allowlist(),
            verify_defaults: cfg.verify.commands.clone(),
            command_timeout: cfg.command_timeout(),
            output_limit_bytes: cfg.output_limit_bytes,
            ripgrep: Ripgrep::new(&cfg.tools.ripgrep, &workdir, cfg.command_timeout()),
            git: Git::new(&cfg.tools.git, &workdir),
            workdir,
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir.join(path)
        }
    }

    fn write_file(&self, started_at: Timestamp, inputs: &WriteFileInputs) -> Result<TaskOutcome> {
        let path = self.resolve(&inputs.path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, &inputs.content).with_context(|| format!("write {}", path.display()))?;
        Ok(TaskOutcome::succeeded(started_at).with_logs(vec![format!(
            "wrote {} ({} bytes)",
            inputs.path,
            inputs.content.len()
        )]))
    }

    fn edit_file(&self, started_at: Timestamp, inputs: &EditFileInputs) -> Result<TaskOutcome> {
        if inputs.find.is_empty() {
            return Ok(TaskOutcome::failed(
                started_at,
                "edit_file requires a non-empty find string",
            ));
        }
        let path = self.resolve(&inputs.path);
        let original =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        if !original.contains(&inputs.find) {
            return Ok(TaskOutcome::failed(
                started_at,
                format!("edit_file could not find match in {}", inputs.path),
            ));
        }
        let updated = original.replacen(&inputs.find, &inputs.replace, 1);
        fs::write(&path, updated).with_context(|| format!("write {}", path.display()))?;
        Ok(TaskOutcome::succeeded(started_at).with_logs(vec![format!("edited {}", inputs.path)]))
    }

    fn read_file(&self, started_at: Timestamp, inputs: &ReadFileInputs) -> Result<TaskOutcome> {
        let path = self.resolve(&inputs.path);
        let file = File::open(&path).with_context(|| format!("open {}", path.display()))?;
        let total_bytes = file
            .metadata()
            .with_context(|| format!("stat {}", path.display()))?
            .len();
        let max_bytes = inputs.max_bytes();
        // A few bytes past the limit so a multi-byte char at the cut stays decodable.
        let mut bytes = Vec::new();
        file.take(u64::try_from(max_bytes).unwrap_or(u64::MAX).saturating_add(3))
            .read_to_end(&mut bytes)
            .with_context(|| format!("read {}", path.display()))?;
        let text = String::from_utf8_lossy(&bytes);
        let (content, truncated) = truncate_utf8(&text, max_bytes);
        Ok(
            TaskOutcome::succeeded(started_at).with_output(TaskOutput::FileContent(FileContent {
                content: content.to_string(),
                truncated: truncated || (bytes.len() as u64) < total_bytes,
                total_bytes: usize::try_from(total_bytes).unwrap_or(usize::MAX),
            })),
        )
    }

    fn list_files(&self, started_at: Timestamp, inputs: &ListFilesInputs) -> Result<TaskOutcome> {
        let outcome =
            self.ripgrep
                .list_files(inputs.root(), inputs.pattern.as_deref(), inputs.max())?;
        Ok(tool_outcome(started_at, outcome, TaskOutput::FileList))
    }

    fn grep(&self, started_at: Timestamp, inputs: &GrepInputs) -> Result<TaskOutcome> {
        let outcome = self
            .ripgrep
            .grep(&inputs.root, &inputs.pattern, inputs.max_matches())?;
        Ok(tool_outcome(started_at, outcome, TaskOutput::Matches))
    }

    /// Check then apply a unified diff; the temp patch file goes away with its directory.
    fn apply_patch(&self, started_at: Timestamp, inputs: &ApplyPatchInputs) -> Result<TaskOutcome> {
        let scratch = tempfile::Builder::new()
            .prefix("autoloop-patch-")
            .tempdir()
            .context("create patch temp dir")?;
        let patch_path = scratch.path().join("change.patch");
        let mut patch = inputs.patch.clone();
        if !patch.ends_with('\n') {
            patch.push('\n');
        }
        fs::write(&patch_path, patch)
            .with_context(|| format!("write {}", patch_path.display()))?;

        self.git.apply_check(&patch_path)?;
        self.git.apply(&patch_path)?;
        Ok(TaskOutcome::succeeded(started_at).with_logs(vec!["patch applied".to_string()]))
    }

    fn shell(&self, started_at: Timestamp, inputs: &ShellInputs) -> Result<TaskOutcome> {
        if !self.allowlist.permits(&inputs.command) {
            warn!(command = %inputs.command, "shell command rejected by allowlist");
            return Ok(TaskOutcome::failed(
                started_at,
                format!("shell command is not allowlisted: {}", inputs.command),
            ));
        }
        let mut logs = Vec::new();
        let run = self.run_allowed(&inputs.command, &mut logs)?;
        Ok(commands_outcome(started_at, vec![run], logs))
    }

    /// Run each command in order, stopping at the first disallowed or failing one.
    fn verify(&self, started_at: Timestamp, inputs: &VerifyInputs) -> Result<TaskOutcome> {
        let commands = inputs.commands.as_ref().unwrap_or(&self.verify_defaults);
        if commands.is_empty() {
            return Ok(TaskOutcome::failed(started_at, "verify has no commands to run"));
        }

        let mut runs = Vec::new();
        let mut logs = Vec::new();
        for command in commands {
            if !self.allowlist.permits(command) {
                warn!(command = %command, "verify command rejected by allowlist");
                return Ok(TaskOutcome::failed(
                    started_at,
                    format!("verify command is not allowlisted: {command}"),
                )
                .with_output(TaskOutput::Commands(CommandRuns { commands: runs }))
                .with_logs(logs));
            }
            let run = self.run_allowed(command, &mut logs)?;
            let failed = !command_succeeded(&run);
            runs.push(run);
            if failed {
                break;
            }
        }
        Ok(commands_outcome(started_at, runs, logs))
    }

    #[instrument(skip_all, fields(command = %command))]
    fn run_allowed(&self, command: &str, logs: &mut Vec<String>) -> Result<CommandRun> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&self.workdir);
        let output = run_command_with_timeout(cmd, self.command_timeout, self.output_limit_bytes)
            .with_context(|| format!("run `{command}`"))?;

        logs.push(format!("$ {command}"));
        let stdout = output_text(&output.stdout);
        if !stdout.is_empty() {
            logs.push(stdout);
        }
        let stderr = output_text(&output.stderr);
        if !stderr.is_empty() {
            logs.push(stderr);
        }
        if let Some(notice) = output.truncation_notice() {
            logs.push(notice);
        }
        if output.timed_out {
            logs.push(format!(
                "timed out after {}s",
                self.command_timeout.as_secs()
            ));
        }
        debug!(exit_code = ?output.status.code(), timed_out = output.timed_out, "command finished");
        Ok(CommandRun {
            command: command.to_string(),
            exit_code: output.status.code(),
            timed_out: output.timed_out,
        })
    }
}

impl TaskRunner for LocalTaskRunner {
    #[instrument(skip_all, fields(task_id = %task.id, kind = task.op.kind()))]
    fn run(&self, task: &Task) -> Result<TaskOutcome> {
        let started_at = Utc::now();
        let outcome = match &task.op {
            TaskOp::Noop => {
                Ok(TaskOutcome::succeeded(started_at).with_logs(vec!["noop".to_string()]))
            }
            TaskOp::WriteFile(inputs) => self.write_file(started_at, inputs),
            TaskOp::EditFile(inputs) => self.edit_file(started_at, inputs),
            TaskOp::ReadFile(inputs) => self.read_file(started_at, inputs),
            TaskOp::ListFiles(inputs) => self.list_files(started_at, inputs),
            TaskOp::Grep(inputs) => self.grep(started_at, inputs),
            TaskOp::ApplyPatch(inputs) => self.apply_patch(started_at, inputs),
            TaskOp::Shell(inputs) => self.shell(started_at, inputs),
            TaskOp::Verify(inputs) => self.verify(started_at, inputs),
            TaskOp::Unsupported { kind, .. } => Ok(TaskOutcome::failed(
                started_at,
                format!("unsupported task type: {kind}"),
            )),
        }?;
        info!(ok = outcome.ok, "task finished");
        Ok(outcome)
    }
}

fn command_succeeded(run: &CommandRun) -> bool {
    !run.timed_out && run.exit_code == Some(0)
}

fn commands_outcome(started_at: Timestamp, runs: Vec<CommandRun>, logs: Vec<String>) -> TaskOutcome {
    let failed = runs.iter().find(|run| !command_succeeded(run)).map(|run| {
        if run.timed_out {
            format!("command timed out: {}", run.command)
        } else {
            match run.exit_code {
                Some(code) => format!("command exited with code {code}: {}", run.command),
                None => format!("command terminated by signal: {}", run.command),
            }
        }
    });
    let outcome = match failed {
        Some(message) => TaskOutcome::failed(started_at, message),
        None => TaskOutcome::succeeded(started_at),
    };
    outcome
        .with_output(TaskOutput::Commands(CommandRuns { commands: runs }))
        .with_logs(logs)
}

fn tool_outcome<T>(
    started_at: Timestamp,
    outcome: ToolOutcome<T>,
    wrap: impl FnOnce(T) -> TaskOutput,
) -> TaskOutcome {
    match outcome {
        ToolOutcome::Found(found) => TaskOutcome::succeeded(started_at).with_output(wrap(found)),
        ToolOutcome::Missing { program } => TaskOutcome::failed(
            started_at,
            format!(
                "ripgrep executable '{program}' not found; install ripgrep or set tools.ripgrep in .autoloop/config.toml"
            ),
        ),
        ToolOutcome::Failed {
            exit_code,
            stdout,
            stderr,
        } => {
            let message = match exit_code {
                Some(code) => format!("ripgrep failed with exit code {code}"),
                None => "ripgrep was terminated (timeout or signal)".to_string(),
            };
            let logs = [stdout, stderr]
                .into_iter()
                .filter(|text| !text.is_empty())
                .collect();
            TaskOutcome::failed(started_at, message).with_logs(logs)
        }
    }
}
