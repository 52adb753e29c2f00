//! Data model for plans, task results, and verdicts.
//!
//! These types are the stable contract between the planner, the task executor,
//! the evaluator, and the artifact store. Serialized field names are camelCase
//! so persisted artifacts keep a fixed shape.
//!
//! Task inputs and outputs are tagged by task type instead of being free-form
//! maps. A task whose type is outside the closed set still deserializes (as
//! [`TaskOp::Unsupported`]) so the executor can report it as a logical failure.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

pub type Timestamp = DateTime<Utc>;

/// Default `maxBytes` for `read_file` (1 MiB).
pub const DEFAULT_READ_MAX_BYTES: usize = 1024 * 1024;
/// Default `max` for `list_files`.
pub const DEFAULT_LIST_MAX: usize = 200;
/// Default `maxMatches` for `grep`.
pub const DEFAULT_GREP_MAX_MATCHES: usize = 50;

/// Machine-readable stop reasons recorded in `Verdict.next.stopReason`.
pub mod stop_reason {
    pub const USER_INTERRUPT: &str = "user-interrupt";
    pub const DRY_RUN: &str = "dry-run";
    pub const MAX_ITERATIONS: &str = "max-iterations";
    pub const TASK_FAILED: &str = "task-failed";
}

/// Run-level status tracked by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Continue,
    Done,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Continue => "continue",
            RunStatus::Done => "done",
            RunStatus::Failed => "failed",
            RunStatus::Stopped => "stopped",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running" => Some(RunStatus::Running),
            "continue" => Some(RunStatus::Continue),
            "done" => Some(RunStatus::Done),
            "failed" => Some(RunStatus::Failed),
            "stopped" => Some(RunStatus::Stopped),
            _ => None,
        }
    }
}

/// Status that closes an iteration. Everything except `Continue` ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Continue,
    Done,
    Failed,
    Stopped,
}

impl VerdictStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, VerdictStatus::Continue)
    }

    pub fn as_str(self) -> &'static str {
        RunStatus::from(self).as_str()
    }
}

impl From<VerdictStatus> for RunStatus {
    fn from(status: VerdictStatus) -> Self {
        match status {
            VerdictStatus::Continue => RunStatus::Continue,
            VerdictStatus::Done => RunStatus::Done,
            VerdictStatus::Failed => RunStatus::Failed,
            VerdictStatus::Stopped => RunStatus::Stopped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteFileInputs {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditFileInputs {
    pub path: String,
    pub find: String,
    #[serde(default)]
    pub replace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadFileInputs {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<usize>,
}

impl ReadFileInputs {
    pub fn max_bytes(&self) -> usize {
        self.max_bytes.unwrap_or(DEFAULT_READ_MAX_BYTES)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesInputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// Substring filter applied to each listed path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,
}

impl ListFilesInputs {
    pub fn root(&self) -> &str {
        self.root.as_deref().unwrap_or(".")
    }

    pub fn max(&self) -> usize {
        self.max.unwrap_or(DEFAULT_LIST_MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrepInputs {
    pub root: String,
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_matches: Option<usize>,
}

impl GrepInputs {
    pub fn max_matches(&self) -> usize {
        self.max_matches.unwrap_or(DEFAULT_GREP_MAX_MATCHES)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyPatchInputs {
    /// Unified diff text.
    pub patch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellInputs {
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyInputs {
    /// Commands to run in order. `None` means the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<String>>,
}

/// Operation performed by a task, with its typed inputs.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOp {
    Noop,
    WriteFile(WriteFileInputs),
    EditFile(EditFileInputs),
    ReadFile(ReadFileInputs),
    ListFiles(ListFilesInputs),
    Grep(GrepInputs),
    ApplyPatch(ApplyPatchInputs),
    Shell(ShellInputs),
    Verify(VerifyInputs),
    /// A task type outside the supported set, kept verbatim.
    Unsupported {
        kind: String,
        inputs: Map<String, Value>,
    },
}

impl TaskOp {
    /// Wire name of the task type (the `type` field).
    pub fn kind(&self) -> &str {
        match self {
            TaskOp::Noop => "noop",
            TaskOp::WriteFile(_) => "write_file",
            TaskOp::EditFile(_) => "edit_file",
            TaskOp::ReadFile(_) => "read_file",
            TaskOp::ListFiles(_) => "list_files",
            TaskOp::Grep(_) => "grep",
            TaskOp::ApplyPatch(_) => "apply_patch",
            TaskOp::Shell(_) => "shell",
            TaskOp::Verify(_) => "verify",
            TaskOp::Unsupported { kind, .. } => kind.as_str(),
        }
    }
}

/// One discrete unit of work in a plan.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawTask")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub rationale: String,
    pub op: TaskOp,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        rationale: impl Into<String>,
        op: TaskOp,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            rationale: rationale.into(),
            op,
        }
    }
}

impl Serialize for Task {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Task", 5)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("type", self.op.kind())?;
        state.serialize_field("title", &self.title)?;
        state.serialize_field("rationale", &self.rationale)?;
        match &self.op {
            TaskOp::Noop => state.serialize_field("inputs", &Map::new())?,
            TaskOp::WriteFile(inputs) => state.serialize_field("inputs", inputs)?,
            TaskOp::EditFile(inputs) => state.serialize_field("inputs", inputs)?,
            TaskOp::ReadFile(inputs) => state.serialize_field("inputs", inputs)?,
            TaskOp::ListFiles(inputs) => state.serialize_field("inputs", inputs)?,
            TaskOp::Grep(inputs) => state.serialize_field("inputs", inputs)?,
            TaskOp::ApplyPatch(inputs) => state.serialize_field("inputs", inputs)?,
            TaskOp::Shell(inputs) => state.serialize_field("inputs", inputs)?,
            TaskOp::Verify(inputs) => state.serialize_field("inputs", inputs)?,
            TaskOp::Unsupported { inputs, .. } => state.serialize_field("inputs", inputs)?,
        }
        state.end()
    }
}

/// Wire shape of a task before its inputs are typed.
#[derive(Deserialize)]
struct RawTask {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    title: String,
    rationale: String,
    #[serde(default)]
    inputs: Map<String, Value>,
}

impl TryFrom<RawTask> for Task {
    type Error = String;

    fn try_from(raw: RawTask) -> Result<Self, Self::Error> {
        let inputs = raw.inputs;
        let op = match raw.kind.as_str() {
            "noop" => TaskOp::Noop,
            "write_file" => TaskOp::WriteFile(decode_inputs(&raw.kind, inputs)?),
            "edit_file" => TaskOp::EditFile(decode_inputs(&raw.kind, inputs)?),
            "read_file" => TaskOp::ReadFile(decode_inputs(&raw.kind, inputs)?),
            "list_files" => TaskOp::ListFiles(decode_inputs(&raw.kind, inputs)?),
            "grep" => TaskOp::Grep(decode_inputs(&raw.kind, inputs)?),
            "apply_patch" => TaskOp::ApplyPatch(decode_inputs(&raw.kind, inputs)?),
            "shell" => TaskOp::Shell(decode_inputs(&raw.kind, inputs)?),
            "verify" => TaskOp::Verify(decode_inputs(&raw.kind, inputs)?),
            _ => TaskOp::Unsupported {
                kind: raw.kind.clone(),
                inputs,
            },
        };
        Ok(Task {
            id: raw.id,
            title: raw.title,
            rationale: raw.rationale,
            op,
        })
    }
}

fn decode_inputs<T: DeserializeOwned>(kind: &str, inputs: Map<String, Value>) -> Result<T, String> {
    serde_json::from_value(Value::Object(inputs))
        .map_err(|err| format!("invalid inputs for {kind} task: {err}"))
}

/// Ordered task list produced by the planner for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub run_id: String,
    pub iteration: u32,
    pub created_at: Timestamp,
    pub goal: String,
    pub tasks: Vec<Task>,
}

/// Error details attached to a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    pub content: String,
    pub truncated: bool,
    /// Size of the file on disk, before truncation.
    pub total_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    pub files: Vec<String>,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrepMatch {
    pub path: String,
    pub line: u64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchList {
    pub matches: Vec<GrepMatch>,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRun {
    pub command: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRuns {
    pub commands: Vec<CommandRun>,
}

/// Type-specific payload of a task result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskOutput {
    FileContent(FileContent),
    FileList(FileList),
    Matches(MatchList),
    Commands(CommandRuns),
}

/// What the task executor reports for one task (a result without its task id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub ok: bool,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<TaskOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
}

impl TaskOutcome {
    pub fn succeeded(started_at: Timestamp) -> Self {
        Self {
            ok: true,
            started_at,
            finished_at: Utc::now(),
            output: None,
            error: None,
            logs: Vec::new(),
        }
    }

    pub fn failed(started_at: Timestamp, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            started_at,
            finished_at: Utc::now(),
            output: None,
            error: Some(TaskError {
                message: message.into(),
                trace: None,
            }),
            logs: Vec::new(),
        }
    }

    pub fn with_output(mut self, output: TaskOutput) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.logs = logs;
        self
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|err| err.message.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
}

/// Task results for one iteration, one-to-one with the plan's tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Results {
    pub run_id: String,
    pub iteration: u32,
    pub created_at: Timestamp,
    pub task_results: Vec<TaskResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictNext {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_tasks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// Decision that closes an iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub run_id: String,
    pub iteration: u32,
    pub created_at: Timestamp,
    pub status: VerdictStatus,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<VerdictNext>,
}

impl Verdict {
    /// A `stopped` verdict with a machine-readable stop reason.
    pub fn stopped(
        run_id: &str,
        iteration: u32,
        rationale: impl Into<String>,
        stop_reason: &str,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            iteration,
            created_at: Utc::now(),
            status: VerdictStatus::Stopped,
            rationale: rationale.into(),
            next: Some(VerdictNext {
                suggested_tasks: Vec::new(),
                stop_reason: Some(stop_reason.to_string()),
            }),
        }
    }

    pub fn stop_reason(&self) -> Option<&str> {
        self.next.as_ref()?.stop_reason.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_serializes_type_and_inputs() {
        let task = Task::new(
            "task-0-list_files",
            "List files",
            "Goal requested a listing",
            TaskOp::ListFiles(ListFilesInputs {
                root: Some(".".to_string()),
                ..ListFilesInputs::default()
            }),
        );

        let value = serde_json::to_value(&task).expect("serialize");
        assert_eq!(
            value,
            json!({
                "id": "task-0-list_files",
                "type": "list_files",
                "title": "List files",
                "rationale": "Goal requested a listing",
                "inputs": { "root": "." }
            })
        );
    }

    #[test]
    fn noop_task_serializes_empty_inputs() {
        let task = Task::new("t", "No operation", "nothing to do", TaskOp::Noop);
        let value = serde_json::to_value(&task).expect("serialize");
        assert_eq!(value["inputs"], json!({}));
        assert_eq!(value["type"], "noop");
    }

    #[test]
    fn unknown_task_type_deserializes_as_unsupported() {
        let task: Task = serde_json::from_value(json!({
            "id": "t1",
            "type": "db",
            "title": "Query",
            "rationale": "legacy",
            "inputs": { "sql": "select 1" }
        }))
        .expect("deserialize");

        match &task.op {
            TaskOp::Unsupported { kind, inputs } => {
                assert_eq!(kind, "db");
                assert_eq!(inputs["sql"], "select 1");
            }
            other => panic!("expected unsupported op, got {other:?}"),
        }
        assert_eq!(task.op.kind(), "db");
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        let err = serde_json::from_value::<Task>(json!({
            "id": "t1",
            "type": "write_file",
            "title": "Write",
            "rationale": "r",
            "inputs": { "path": "a.txt" }
        }))
        .expect_err("missing content must fail");
        assert!(err.to_string().contains("invalid inputs for write_file task"));
    }

    #[test]
    fn task_result_flattens_outcome() {
        let started_at = Utc::now();
        let result = TaskResult {
            task_id: "t1".to_string(),
            outcome: TaskOutcome::failed(started_at, "boom"),
        };

        let value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(value["taskId"], "t1");
        assert_eq!(value["ok"], false);
        assert_eq!(value["error"]["message"], "boom");
        assert!(value.get("logs").is_none());
        assert!(value.get("output").is_none());

        let back: TaskResult = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, result);
    }

    #[test]
    fn stopped_verdict_carries_stop_reason() {
        let verdict = Verdict::stopped("run-1", 4, "Dry-run requested", stop_reason::DRY_RUN);
        let value = serde_json::to_value(&verdict).expect("serialize");
        assert_eq!(value["status"], "stopped");
        assert_eq!(value["next"], json!({ "stopReason": "dry-run" }));
        assert_eq!(verdict.stop_reason(), Some("dry-run"));
        assert!(verdict.status.is_terminal());
    }

    #[test]
    fn output_variants_are_distinguishable() {
        let output: TaskOutput = serde_json::from_value(json!({
            "matches": [{ "path": "src/lib.rs", "line": 3, "text": "// TODO" }],
            "truncated": false
        }))
        .expect("deserialize");
        assert!(matches!(output, TaskOutput::Matches(_)));
    }
}
