//! Iteration Controller: drives plan → execute → evaluate → persist cycles.

use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};
use tracing::{error, info, instrument, warn};

use crate::core::contracts::ContractViolation;
use crate::core::types::{RunStatus, Verdict, stop_reason};
use crate::evaluator::Evaluator;
use crate::io::artifacts::ArtifactStore;
use crate::io::git::Git;
use crate::io::ledger::RunLedger;
use crate::io::run_id::validate_run_id;
use crate::io::task_exec::TaskRunner;
use crate::planner::Planner;
use crate::retry::{RetryPolicy, Sleeper, ThreadSleeper};
use crate::step::StepOutcome;

/// The loop's collaborators.
///
/// Planner, task runner, evaluator, and ledger are swappable; tests drive the
/// loop with scripted implementations of each.
pub struct Harness<P, T, V, L, S = ThreadSleeper> {
    pub planner: P,
    pub tasks: T,
    pub evaluator: V,
    pub ledger: L,
    pub sleeper: S,
    pub artifacts: ArtifactStore,
    pub retry: RetryPolicy,
    /// Used only for the observational environment snapshot.
    pub git: Git,
    pub workdir: PathBuf,
}

impl<P, T, V, L> Harness<P, T, V, L, ThreadSleeper> {
    pub fn new(
        planner: P,
        tasks: T,
        evaluator: V,
        ledger: L,
        artifacts: ArtifactStore,
        git: Git,
    ) -> Self {
        let workdir = git.workdir().to_path_buf();
        Self {
            planner,
            tasks,
            evaluator,
            ledger,
            sleeper: ThreadSleeper,
            artifacts,
            retry: RetryPolicy::default(),
            git,
            workdir,
        }
    }
}

impl<P, T, V, L, S> Harness<P, T, V, L, S> {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper<S2>(self, sleeper: S2) -> Harness<P, T, V, L, S2> {
        Harness {
            planner: self.planner,
            tasks: self.tasks,
            evaluator: self.evaluator,
            ledger: self.ledger,
            sleeper,
            artifacts: self.artifacts,
            retry: self.retry,
            git: self.git,
            workdir: self.workdir,
        }
    }
}

/// Parameters for one invocation of the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopRequest {
    pub run_id: String,
    pub goal: String,
    /// Iterations allowed in this invocation, counted from the resume point.
    pub max_iterations: u32,
    pub dry_run: bool,
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub run_id: String,
    pub started_at_iteration: u32,
    pub iterations_executed: u32,
    pub final_verdict: Verdict,
}

impl<P, T, V, L, S> Harness<P, T, V, L, S>
where
    P: Planner,
    T: TaskRunner,
    V: Evaluator,
    L: RunLedger,
    S: Sleeper,
{
    /// Run iterations until a terminal verdict.
    ///
    /// Resumes at the ledger's latest completed iteration + 1. `should_stop`
    /// is polled once at the top of each iteration; an in-flight task is never
    /// interrupted. The last permitted iteration always closes with a terminal
    /// verdict, so every invocation ends on one.
    ///
    /// Any error (including a [`ContractViolation`]) ends the loop and marks the
    /// run failed in the ledger, best effort.
    #[instrument(skip_all, fields(run_id = %request.run_id, max_iterations = request.max_iterations))]
    pub fn run_loop<C, F>(
        &self,
        request: &LoopRequest,
        should_stop: C,
        mut on_step: F,
    ) -> Result<LoopOutcome>
    where
        C: Fn() -> bool,
        F: FnMut(&StepOutcome),
    {
        validate_run_id(&request.run_id)?;
        if request.max_iterations == 0 {
            bail!("max iterations must be > 0");
        }
        let run_id = request.run_id.as_str();

        self.ledger
            .upsert_run(run_id, &request.goal, RunStatus::Running)?;
        let started_at_iteration = match self.ledger.latest_iteration(run_id)? {
            Some(latest) => latest
                .checked_add(1)
                .ok_or_else(|| anyhow!("run {run_id} has no iterations left"))?,
            None => 0,
        };
        info!(started_at_iteration, "loop starting");

        let mut iterations_executed = 0u32;
        let mut final_verdict = None;
        for offset in 0..request.max_iterations {
            let iteration = started_at_iteration + offset;
            let last_permitted = offset + 1 == request.max_iterations;

            let step = self.run_iteration(request, iteration, last_permitted, &should_stop);
            let step = match step {
                Ok(step) => step,
                Err(err) => {
                    self.mark_failed(request, iteration, &err);
                    return Err(err);
                }
            };
            iterations_executed += 1;
            on_step(&step);

            let terminal = step.verdict.status.is_terminal();
            final_verdict = Some(step.verdict);
            if terminal {
                break;
            }
        }

        let final_verdict =
            final_verdict.ok_or_else(|| anyhow!("loop ended without a verdict"))?;
        if !final_verdict.status.is_terminal() {
            bail!(
                "iteration {} closed with a non-terminal verdict",
                final_verdict.iteration
            );
        }
        info!(
            iterations_executed,
            status = final_verdict.status.as_str(),
            "loop finished"
        );
        Ok(LoopOutcome {
            run_id: request.run_id.clone(),
            started_at_iteration,
            iterations_executed,
            final_verdict,
        })
    }

    fn run_iteration<C: Fn() -> bool>(
        &self,
        request: &LoopRequest,
        iteration: u32,
        last_permitted: bool,
        should_stop: &C,
    ) -> Result<StepOutcome> {
        self.artifacts
            .discard_incomplete(&request.run_id, iteration)?;

        if should_stop() {
            warn!(iteration, "stop requested");
            let verdict = Verdict::stopped(
                &request.run_id,
                iteration,
                "Interrupted by user",
                stop_reason::USER_INTERRUPT,
            );
            return self.close_iteration(&request.run_id, &request.goal, iteration, verdict, 0);
        }

        let max_iterations = last_permitted.then_some(request.max_iterations);
        self.run_step(request, iteration, max_iterations)
    }

    fn mark_failed(&self, request: &LoopRequest, iteration: u32, err: &anyhow::Error) {
        if let Some(violation) = err.downcast_ref::<ContractViolation>() {
            error!(iteration, artifact = violation.artifact, errors = ?violation.errors, "contract violation");
        } else {
            error!(iteration, err = %format!("{err:#}"), "iteration aborted");
        }
        if let Err(mark_err) =
            self.ledger
                .upsert_run(&request.run_id, &request.goal, RunStatus::Failed)
        {
            warn!(err = %format!("{mark_err:#}"), "could not mark run failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{TaskOp, VerdictStatus};
    use crate::io::artifacts::ArtifactKind;
    use crate::test_support::{
        ScriptedEvaluator, ScriptedPlanner, ScriptedTaskRunner, TestWorkspace, task,
    };

    fn request(max_iterations: u32) -> LoopRequest {
        LoopRequest {
            run_id: "run-1".to_string(),
            goal: "goal".to_string(),
            max_iterations,
            dry_run: false,
        }
    }

    #[test]
    fn rejects_zero_iterations_and_bad_ids() {
        let ws = TestWorkspace::new();
        let harness = ws.harness(
            ScriptedPlanner::noop(),
            ScriptedTaskRunner::default(),
            ScriptedEvaluator::always(VerdictStatus::Done),
        );

        assert!(harness.run_loop(&request(0), || false, |_| {}).is_err());

        let mut bad = request(1);
        bad.run_id = "../escape".to_string();
        assert!(harness.run_loop(&bad, || false, |_| {}).is_err());
    }

    #[test]
    fn stops_on_terminal_verdict() {
        let ws = TestWorkspace::new();
        let harness = ws.harness(
            ScriptedPlanner::noop(),
            ScriptedTaskRunner::default(),
            ScriptedEvaluator::sequence(vec![VerdictStatus::Continue, VerdictStatus::Done]),
        );

        let mut seen = Vec::new();
        let outcome = harness
            .run_loop(&request(10), || false, |step| seen.push(step.iteration))
            .expect("loop");

        assert_eq!(seen, vec![0, 1]);
        assert_eq!(outcome.iterations_executed, 2);
        assert_eq!(outcome.final_verdict.status, VerdictStatus::Done);
    }

    #[test]
    fn incomplete_iteration_artifacts_are_discarded() {
        let ws = TestWorkspace::new();
        let artifacts = ws.artifacts();
        artifacts
            .write("run-1", 0, ArtifactKind::Plan, &serde_json::json!({ "stale": true }))
            .expect("seed stale plan");

        let harness = ws.harness(
            ScriptedPlanner::with_tasks(vec![vec![task("t", TaskOp::Noop)]]),
            ScriptedTaskRunner::default(),
            ScriptedEvaluator::always(VerdictStatus::Done),
        );
        harness.run_loop(&request(1), || false, |_| {}).expect("loop");

        let plan: serde_json::Value = artifacts
            .read("run-1", 0, ArtifactKind::Plan)
            .expect("read plan");
        assert_eq!(plan["runId"], "run-1");
        assert!(plan.get("stale").is_none());
    }
}
