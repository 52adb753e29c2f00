//! Test-only helpers: scripted collaborators, builders, and a temp workspace.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tempfile::TempDir;

use crate::core::types::{
    Plan, Results, Task, TaskOp, TaskOutcome, TaskResult, Verdict, VerdictNext, VerdictStatus,
};
use crate::evaluator::Evaluator;
use crate::io::artifacts::ArtifactStore;
use crate::io::git::Git;
use crate::io::ledger::SqliteLedger;
use crate::io::paths::AutoloopPaths;
use crate::io::task_exec::TaskRunner;
use crate::looping::Harness;
use crate::planner::{PlanRequest, Planner};
use crate::retry::Sleeper;

/// True if `program` can be spawned from PATH.
pub fn has_program(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .stdin(std::process::Stdio::null())
        .output()
        .is_ok()
}

/// Write an executable shell script to `dir/name` and return its path.
#[cfg(unix)]
pub fn write_stub_program(dir: &Path, name: &str, script: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{script}")).expect("write stub");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod stub");
    path
}

/// Initialize a git repo on `main` with one commit.
pub fn init_git_repo(root: &Path) {
    let git = |args: &[&str]| {
        let status = Command::new("git")
            .args(["-c", "user.name=autoloop", "-c", "user.email=autoloop@example.com"])
            .args(args)
            .current_dir(root)
            .output()
            .expect("spawn git");
        assert!(
            status.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&status.stderr)
        );
    };
    git(&["init", "-q"]);
    git(&["checkout", "-q", "-b", "main"]);
    git(&["commit", "-q", "--allow-empty", "-m", "init"]);
}

pub fn task(id: &str, op: TaskOp) -> Task {
    Task::new(id, format!("{id} title"), format!("{id} rationale"), op)
}

pub fn noop_task(id: &str) -> Task {
    task(id, TaskOp::Noop)
}

pub fn plan_with(run_id: &str, iteration: u32, tasks: Vec<Task>) -> Plan {
    Plan {
        run_id: run_id.to_string(),
        iteration,
        created_at: Utc::now(),
        goal: "test goal".to_string(),
        tasks,
    }
}

/// Successful results answering every task of `plan`.
pub fn results_for(plan: &Plan) -> Results {
    Results {
        run_id: plan.run_id.clone(),
        iteration: plan.iteration,
        created_at: Utc::now(),
        task_results: plan
            .tasks
            .iter()
            .map(|task| TaskResult {
                task_id: task.id.clone(),
                outcome: TaskOutcome::succeeded(Utc::now()),
            })
            .collect(),
    }
}

/// Planner that replays task lists; the last list repeats once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedPlanner {
    script: RefCell<VecDeque<Vec<Task>>>,
    last: RefCell<Vec<Task>>,
    requests: RefCell<Vec<PlanRequest>>,
}

impl ScriptedPlanner {
    pub fn with_tasks(script: Vec<Vec<Task>>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            ..Self::default()
        }
    }

    /// Always plans a single no-op.
    pub fn noop() -> Self {
        Self::with_tasks(vec![vec![noop_task("noop")]])
    }

    pub fn requests(&self) -> Vec<PlanRequest> {
        self.requests.borrow().clone()
    }
}

impl Planner for ScriptedPlanner {
    fn plan(&self, request: &PlanRequest) -> Result<Plan> {
        self.requests.borrow_mut().push(request.clone());
        if let Some(tasks) = self.script.borrow_mut().pop_front() {
            *self.last.borrow_mut() = tasks;
        }
        let mut plan = plan_with(
            &request.run_id,
            request.iteration,
            self.last.borrow().clone(),
        );
        plan.goal = request.goal.clone();
        Ok(plan)
    }
}

/// Task runner that replays scripted attempts; succeeds once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedTaskRunner {
    script: RefCell<VecDeque<Result<TaskOutcome>>>,
    calls: Cell<usize>,
    seen: RefCell<Vec<String>>,
}

impl ScriptedTaskRunner {
    pub fn new(script: Vec<Result<TaskOutcome>>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    /// Task ids in the order they were run (one entry per attempt).
    pub fn seen_task_ids(&self) -> Vec<String> {
        self.seen.borrow().clone()
    }
}

impl TaskRunner for ScriptedTaskRunner {
    fn run(&self, task: &Task) -> Result<TaskOutcome> {
        self.calls.set(self.calls.get() + 1);
        self.seen.borrow_mut().push(task.id.clone());
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(TaskOutcome::succeeded(Utc::now())))
    }
}

/// Records requested delays instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration) {
        self.delays.borrow_mut().push(delay);
    }
}

/// Evaluator that replays statuses; the last status repeats.
#[derive(Debug)]
pub struct ScriptedEvaluator {
    script: RefCell<VecDeque<VerdictStatus>>,
    last: Cell<VerdictStatus>,
    /// When set, verdicts carry this iteration instead of the plan's.
    pub force_iteration: Option<u32>,
}

impl ScriptedEvaluator {
    pub fn sequence(script: Vec<VerdictStatus>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            last: Cell::new(VerdictStatus::Continue),
            force_iteration: None,
        }
    }

    pub fn always(status: VerdictStatus) -> Self {
        Self::sequence(vec![status])
    }
}

impl Evaluator for ScriptedEvaluator {
    fn evaluate(&self, _goal: &str, plan: &Plan, _results: &Results) -> Result<Verdict> {
        if let Some(status) = self.script.borrow_mut().pop_front() {
            self.last.set(status);
        }
        let status = self.last.get();
        let next = match status {
            VerdictStatus::Continue => Some(VerdictNext {
                suggested_tasks: vec!["keep going".to_string()],
                stop_reason: None,
            }),
            VerdictStatus::Stopped | VerdictStatus::Failed => Some(VerdictNext {
                suggested_tasks: Vec::new(),
                stop_reason: Some("scripted".to_string()),
            }),
            VerdictStatus::Done => None,
        };
        Ok(Verdict {
            run_id: plan.run_id.clone(),
            iteration: self.force_iteration.unwrap_or(plan.iteration),
            created_at: Utc::now(),
            status,
            rationale: format!("scripted {}", status.as_str()),
            next,
        })
    }
}

/// Temporary project root with `.autoloop/` paths.
pub struct TestWorkspace {
    temp: TempDir,
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn paths(&self) -> AutoloopPaths {
        AutoloopPaths::new(self.root())
    }

    pub fn ledger(&self) -> SqliteLedger {
        SqliteLedger::new(self.paths().ledger_path)
    }

    pub fn artifacts(&self) -> ArtifactStore {
        ArtifactStore::new(self.paths().artifacts_dir)
    }

    /// Harness over this workspace with a recording sleeper.
    pub fn harness<P, T, V>(
        &self,
        planner: P,
        tasks: T,
        evaluator: V,
    ) -> Harness<P, T, V, SqliteLedger, RecordingSleeper> {
        Harness::new(
            planner,
            tasks,
            evaluator,
            self.ledger(),
            self.artifacts(),
            Git::new("git", self.root()),
        )
        .with_sleeper(RecordingSleeper::default())
    }
}
