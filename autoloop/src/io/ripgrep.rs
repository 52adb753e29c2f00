//! ripgrep adapter backing `list_files` and `grep` tasks.
//!
//! The tool outcome keeps "program not installed" apart from "ran and failed"
//! so the task executor can report each with an actionable message.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::core::text::output_text;
use crate::core::types::{FileList, GrepMatch, MatchList};
use crate::io::process::{CommandOutput, is_program_missing, run_command_with_timeout};

/// Upper bound on captured rg stdout; listings beyond this are truncated anyway.
const RG_OUTPUT_LIMIT_BYTES: usize = 8 * 1024 * 1024;

/// Result of invoking an external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome<T> {
    Found(T),
    /// The program could not be spawned because it does not exist.
    Missing { program: String },
    /// The program ran and reported an error.
    Failed {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

#[derive(Debug, Clone)]
pub struct Ripgrep {
    program: String,
    workdir: PathBuf,
    timeout: Duration,
}

impl Ripgrep {
    pub fn new(program: impl Into<String>, workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            workdir: workdir.into(),
            timeout,
        }
    }

    /// List files under `root` in path order, keeping those containing `pattern`.
    #[instrument(skip_all, fields(root, max))]
    pub fn list_files(
        &self,
        root: &str,
        pattern: Option<&str>,
        max: usize,
    ) -> Result<ToolOutcome<FileList>> {
        let mut cmd = self.command();
        cmd.args(["--files", "--sort", "path", "--", root]);
        let output = match self.run(cmd)? {
            Ok(output) => output,
            Err(outcome) => return Ok(outcome),
        };
        if let Some(failure) = failure_for(&output) {
            return Ok(failure);
        }

        let stdout = complete_lines(&output);
        let mut files = Vec::new();
        let mut truncated = false;
        for line in stdout.lines().filter(|line| !line.is_empty()) {
            if pattern.is_some_and(|p| !line.contains(p)) {
                continue;
            }
            if files.len() == max {
                truncated = true;
                break;
            }
            files.push(line.to_string());
        }
        truncated |= output.stdout_truncated > 0 && files.len() < max;
        debug!(count = files.len(), truncated, "listed files");
        Ok(ToolOutcome::Found(FileList { files, truncated }))
    }

    /// Search `root` for `pattern`, returning matches in path order.
    #[instrument(skip_all, fields(root, max_matches))]
    pub fn grep(
        &self,
        root: &str,
        pattern: &str,
        max_matches: usize,
    ) -> Result<ToolOutcome<MatchList>> {
        let mut cmd = self.command();
        cmd.args(["--json", "--sort", "path", "-e", pattern, "--", root]);
        let output = match self.run(cmd)? {
            Ok(output) => output,
            Err(outcome) => return Ok(outcome),
        };
        if let Some(failure) = failure_for(&output) {
            return Ok(failure);
        }

        let stdout = complete_lines(&output);
        let mut matches = Vec::new();
        let mut truncated = false;
        for line in stdout.lines() {
            let Some(found) = parse_match_event(line)? else {
                continue;
            };
            if matches.len() == max_matches {
                truncated = true;
                break;
            }
            matches.push(found);
        }
        truncated |= output.stdout_truncated > 0 && matches.len() < max_matches;
        debug!(count = matches.len(), truncated, "grep finished");
        Ok(ToolOutcome::Found(MatchList { matches, truncated }))
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(&self.workdir);
        cmd
    }

    /// Run rg; a missing program becomes `Err(ToolOutcome::Missing)`.
    fn run<T>(&self, cmd: Command) -> Result<Result<CommandOutput, ToolOutcome<T>>> {
        match run_command_with_timeout(cmd, self.timeout, RG_OUTPUT_LIMIT_BYTES) {
            Ok(output) => Ok(Ok(output)),
            Err(err) if is_program_missing(&err) => {
                warn!(program = %self.program, "ripgrep not found");
                Ok(Err(ToolOutcome::Missing {
                    program: self.program.clone(),
                }))
            }
            Err(err) => Err(err).with_context(|| format!("run {}", self.program)),
        }
    }
}

/// rg exits 0 with results, 1 with none, and 2 on error.
fn failure_for<T>(output: &CommandOutput) -> Option<ToolOutcome<T>> {
    let exit_code = output.status.code();
    if !output.timed_out && matches!(exit_code, Some(0) | Some(1)) {
        return None;
    }
    Some(ToolOutcome::Failed {
        exit_code,
        stdout: output_text(&output.stdout),
        stderr: output_text(&output.stderr),
    })
}

/// Stdout as text, without a trailing partial line when output was cut short.
fn complete_lines(output: &CommandOutput) -> String {
    let text = String::from_utf8_lossy(&output.stdout);
    if output.stdout_truncated == 0 {
        return text.into_owned();
    }
    match text.rfind('\n') {
        Some(end) => text[..end].to_string(),
        None => String::new(),
    }
}

#[derive(Deserialize)]
struct RgMatchData {
    path: RgText,
    lines: RgText,
    line_number: Option<u64>,
}

#[derive(Deserialize)]
struct RgText {
    #[serde(default)]
    text: Option<String>,
}

fn parse_match_event(line: &str) -> Result<Option<GrepMatch>> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    let mut event: serde_json::Value =
        serde_json::from_str(line).with_context(|| format!("parse rg event: {line}"))?;
    if event.get("type").and_then(|t| t.as_str()) != Some("match") {
        return Ok(None);
    }
    let data: RgMatchData = serde_json::from_value(event["data"].take())
        .with_context(|| format!("decode rg match: {line}"))?;
    // Non-UTF-8 paths and lines arrive as base64 `bytes` and are skipped.
    let (Some(path), Some(text)) = (data.path.text, data.lines.text) else {
        return Ok(None);
    };
    Ok(Some(GrepMatch {
        path,
        line: data.line_number.unwrap_or(0),
        text: text.trim_end_matches(['\n', '\r']).to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::has_program;
    use std::fs;

    fn fixture() -> tempfile::TempDir {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("src")).expect("mkdir");
        fs::write(temp.path().join("src/b.rs"), "fn b() {}\n// TODO b\n").expect("write");
        fs::write(temp.path().join("src/a.rs"), "// TODO a\n").expect("write");
        fs::write(temp.path().join("README.md"), "readme\n").expect("write");
        temp
    }

    #[test]
    fn parses_match_events_only() {
        let begin = r#"{"type":"begin","data":{"path":{"text":"src/a.rs"}}}"#;
        assert_eq!(parse_match_event(begin).expect("parse"), None);

        let event = r#"{"type":"match","data":{"path":{"text":"src/a.rs"},"lines":{"text":"// TODO a\n"},"line_number":1,"absolute_offset":0,"submatches":[]}}"#;
        assert_eq!(
            parse_match_event(event).expect("parse"),
            Some(GrepMatch {
                path: "src/a.rs".to_string(),
                line: 1,
                text: "// TODO a".to_string(),
            })
        );
    }

    #[test]
    fn missing_program_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let rg = Ripgrep::new("autoloop-no-such-rg", temp.path(), Duration::from_secs(5));
        let outcome = rg.list_files(".", None, 10).expect("list");
        assert_eq!(
            outcome,
            ToolOutcome::Missing {
                program: "autoloop-no-such-rg".to_string()
            }
        );
    }

    #[test]
    fn lists_files_in_path_order_with_cap() {
        if !has_program("rg") {
            return;
        }
        let temp = fixture();
        let rg = Ripgrep::new("rg", temp.path(), Duration::from_secs(30));

        let ToolOutcome::Found(all) = rg.list_files(".", None, 200).expect("list") else {
            panic!("expected listing");
        };
        assert_eq!(all.files, vec!["./README.md", "./src/a.rs", "./src/b.rs"]);
        assert!(!all.truncated);

        let ToolOutcome::Found(capped) = rg.list_files("src", Some(".rs"), 1).expect("list") else {
            panic!("expected listing");
        };
        assert_eq!(capped.files, vec!["src/a.rs"]);
        assert!(capped.truncated);
    }

    #[test]
    fn grep_returns_ordered_matches() {
        if !has_program("rg") {
            return;
        }
        let temp = fixture();
        let rg = Ripgrep::new("rg", temp.path(), Duration::from_secs(30));

        let ToolOutcome::Found(found) = rg.grep("src", "TODO", 50).expect("grep") else {
            panic!("expected matches");
        };
        let lines: Vec<_> = found
            .matches
            .iter()
            .map(|m| (m.path.as_str(), m.line))
            .collect();
        assert_eq!(lines, vec![("src/a.rs", 1), ("src/b.rs", 2)]);
    }

    #[test]
    fn grep_without_matches_is_empty_not_failed() {
        if !has_program("rg") {
            return;
        }
        let temp = fixture();
        let rg = Ripgrep::new("rg", temp.path(), Duration::from_secs(30));
        let outcome = rg.grep(".", "no-such-needle", 50).expect("grep");
        assert_eq!(
            outcome,
            ToolOutcome::Found(MatchList {
                matches: Vec::new(),
                truncated: false
            })
        );
    }

    #[test]
    fn grep_on_missing_root_fails() {
        if !has_program("rg") {
            return;
        }
        let temp = fixture();
        let rg = Ripgrep::new("rg", temp.path(), Duration::from_secs(30));
        let outcome = rg.grep("does-not-exist", "x", 50).expect("grep");
        assert!(matches!(outcome, ToolOutcome::Failed { exit_code: Some(2), .. }));
    }
}
