//! Planner: turns a goal into the ordered task list for one iteration.
//!
//! [`RulePlanner`] is the reference implementation. Goals written as
//! `tool: <keyword> <args>` select one explicit operation:
//!
//! - `read <path>`
//! - `list [root]`
//! - `grep <pattern | "quoted pattern"> [root]`
//! - `verify [command]`
//! - `shell <command>`
//! - `apply-patch <diff>` (alias `patch`)
//!
//! Any other goal mentioning "write" produces a note under
//! `workspace/<run>/<iteration>/note.txt`; everything else is a single no-op.

use std::sync::LazyLock;

use anyhow::Result;
use chrono::Utc;
use regex::Regex;
use tracing::debug;

use crate::core::types::{
    ApplyPatchInputs, GrepInputs, ListFilesInputs, Plan, ReadFileInputs, ShellInputs, Task,
    TaskOp, VerifyInputs, WriteFileInputs,
};

/// Context handed to the planner for one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanRequest {
    pub run_id: String,
    pub iteration: u32,
    pub goal: String,
}

/// Produces a plan with at least one task.
pub trait Planner {
    fn plan(&self, request: &PlanRequest) -> Result<Plan>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RulePlanner;

static TOOL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^\s*tool:\s*(\S+)\s*(.*)$").unwrap());
static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)^"([^"]*)"\s*(.*)$"#).unwrap());

impl Planner for RulePlanner {
    fn plan(&self, request: &PlanRequest) -> Result<Plan> {
        let (op, title, rationale) = match TOOL_RE.captures(&request.goal) {
            Some(caps) => {
                let keyword = caps.get(1).map_or("", |m| m.as_str()).to_lowercase();
                let args = caps.get(2).map_or("", |m| m.as_str());
                tool_task(&keyword, args)
            }
            None => goal_task(request),
        };
        let task = Task::new(
            format!("task-{}-{}", request.iteration, op.kind()),
            title,
            rationale,
            op,
        );
        debug!(
            run_id = %request.run_id,
            iteration = request.iteration,
            task_type = task.op.kind(),
            "planned"
        );
        Ok(Plan {
            run_id: request.run_id.clone(),
            iteration: request.iteration,
            created_at: Utc::now(),
            goal: request.goal.clone(),
            tasks: vec![task],
        })
    }
}

type Planned = (TaskOp, String, String);

fn noop(rationale: impl Into<String>) -> Planned {
    (TaskOp::Noop, "No operation".to_string(), rationale.into())
}

fn tool_task(keyword: &str, args: &str) -> Planned {
    let rest = args.trim();
    let first = rest.split_whitespace().next().unwrap_or("");
    match keyword {
        "read" if !first.is_empty() => (
            TaskOp::ReadFile(ReadFileInputs {
                path: first.to_string(),
                max_bytes: None,
            }),
            format!("Read {first}"),
            "Goal requested a file read".to_string(),
        ),
        "list" => {
            let root = if first.is_empty() { "." } else { first };
            (
                TaskOp::ListFiles(ListFilesInputs {
                    root: Some(root.to_string()),
                    ..ListFilesInputs::default()
                }),
                format!("List files under {root}"),
                "Goal requested a file listing".to_string(),
            )
        }
        "grep" => match split_pattern(rest) {
            Some((pattern, root)) => (
                TaskOp::Grep(GrepInputs {
                    root: root.clone(),
                    pattern: pattern.clone(),
                    max_matches: None,
                }),
                format!("Search for {pattern} in {root}"),
                "Goal requested a search".to_string(),
            ),
            None => noop("grep needs a pattern"),
        },
        "verify" => (
            TaskOp::Verify(VerifyInputs {
                commands: (!rest.is_empty()).then(|| vec![rest.to_string()]),
            }),
            "Run verification".to_string(),
            "Goal requested verification".to_string(),
        ),
        "shell" if !rest.is_empty() => (
            TaskOp::Shell(ShellInputs {
                command: rest.to_string(),
            }),
            format!("Run `{rest}`"),
            "Goal requested a shell command".to_string(),
        ),
        "apply-patch" | "patch" if !rest.is_empty() => (
            TaskOp::ApplyPatch(ApplyPatchInputs {
                patch: args.trim_start().to_string(),
            }),
            "Apply patch".to_string(),
            "Goal supplied a unified diff".to_string(),
        ),
        "read" | "shell" | "apply-patch" | "patch" => {
            noop(format!("tool '{keyword}' needs an argument"))
        }
        other => noop(format!("unrecognised tool '{other}'")),
    }
}

/// Split `"quoted pattern" [root]` or `pattern [root]`; root defaults to `.`.
fn split_pattern(args: &str) -> Option<(String, String)> {
    let (pattern, remainder) = match QUOTED_RE.captures(args) {
        Some(caps) => (
            caps.get(1).map_or("", |m| m.as_str()),
            caps.get(2).map_or("", |m| m.as_str()),
        ),
        None => {
            let mut parts = args.splitn(2, char::is_whitespace);
            (parts.next().unwrap_or(""), parts.next().unwrap_or(""))
        }
    };
    if pattern.is_empty() {
        return None;
    }
    let root = remainder.split_whitespace().next().unwrap_or(".");
    Some((pattern.to_string(), root.to_string()))
}

fn goal_task(request: &PlanRequest) -> Planned {
    if request.goal.to_lowercase().contains("write") {
        return (
            TaskOp::WriteFile(WriteFileInputs {
                path: format!(
                    "workspace/{}/{}/note.txt",
                    request.run_id, request.iteration
                ),
                content: request.goal.clone(),
            }),
            "Write a goal note".to_string(),
            "Goal requests writing".to_string(),
        );
    }
    noop("Nothing actionable in goal")
}
