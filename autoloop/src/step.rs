//! One iteration of the loop: plan, execute, evaluate, persist.

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::contracts::{
    ContractViolation, plan_violations, results_violations, verdict_violations,
};
use crate::core::types::{Results, Verdict, VerdictStatus, stop_reason};
use crate::evaluator::Evaluator;
use crate::io::artifacts::ArtifactKind;
use crate::io::context::EnvSnapshot;
use crate::io::ledger::RunLedger;
use crate::io::schema::schema_violations;
use crate::io::task_exec::TaskRunner;
use crate::looping::{Harness, LoopRequest};
use crate::planner::{PlanRequest, Planner};
use crate::retry::{Sleeper, execute_with_retry};

/// Result of a single iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub run_id: String,
    pub iteration: u32,
    /// Tasks executed this iteration (0 for dry-run and interrupted iterations).
    pub tasks_executed: usize,
    pub tasks_failed: usize,
    pub verdict: Verdict,
}

impl<P, T, V, L, S> Harness<P, T, V, L, S>
where
    P: Planner,
    T: TaskRunner,
    V: Evaluator,
    L: RunLedger,
    S: Sleeper,
{
    /// Execute iteration `iteration` of the run.
    ///
    /// `max_iterations` is set only for the last iteration the invocation
    /// permits; a `continue` verdict there becomes `stopped`.
    #[instrument(skip_all, fields(run_id = %request.run_id, iteration = iteration))]
    pub(crate) fn run_step(
        &self,
        request: &LoopRequest,
        iteration: u32,
        max_iterations: Option<u32>,
    ) -> Result<StepOutcome> {
        let run_id = request.run_id.as_str();

        let snapshot = EnvSnapshot::capture(&self.workdir, &self.git);
        if let Err(err) = self
            .artifacts
            .write(run_id, iteration, ArtifactKind::Context, &snapshot)
        {
            warn!(err = %format!("{err:#}"), "environment snapshot not persisted");
        }

        let plan = self.planner.plan(&PlanRequest {
            run_id: run_id.to_string(),
            iteration,
            goal: request.goal.clone(),
        })?;
        let mut errors = schema_violations(ArtifactKind::Plan, &plan)?;
        errors.extend(plan_violations(&plan, run_id, iteration));
        ensure_contract("plan", errors)?;
        self.artifacts
            .write(run_id, iteration, ArtifactKind::Plan, &plan)?;
        debug!(tasks = plan.tasks.len(), "plan persisted");

        if request.dry_run {
            info!("dry run: skipping execution");
            let verdict =
                Verdict::stopped(run_id, iteration, "Dry-run requested", stop_reason::DRY_RUN);
            return self.close_iteration(run_id, &request.goal, iteration, verdict, 0);
        }

        let task_results = plan
            .tasks
            .iter()
            .map(|task| execute_with_retry(&self.tasks, task, &self.retry, &self.sleeper))
            .collect::<Vec<_>>();
        let tasks_failed = task_results.iter().filter(|r| !r.outcome.ok).count();
        let results = Results {
            run_id: run_id.to_string(),
            iteration,
            created_at: Utc::now(),
            task_results,
        };
        let mut errors = schema_violations(ArtifactKind::Results, &results)?;
        errors.extend(results_violations(&plan, &results));
        ensure_contract("results", errors)?;
        self.artifacts
            .write(run_id, iteration, ArtifactKind::Results, &results)?;
        debug!(tasks_failed, "results persisted");

        let mut verdict = self.evaluator.evaluate(&request.goal, &plan, &results)?;
        if let Some(max) = max_iterations
            && verdict.status == VerdictStatus::Continue
        {
            verdict = exhausted(verdict, max);
        }

        let mut step =
            self.close_iteration(run_id, &request.goal, iteration, verdict, plan.tasks.len())?;
        step.tasks_failed = tasks_failed;
        Ok(step)
    }

    /// Validate and persist the verdict for `iteration`, then record it in the ledger.
    pub(crate) fn close_iteration(
        &self,
        run_id: &str,
        goal: &str,
        iteration: u32,
        verdict: Verdict,
        tasks_executed: usize,
    ) -> Result<StepOutcome> {
        let mut errors = schema_violations(ArtifactKind::Verdict, &verdict)?;
        errors.extend(verdict_violations(&verdict, run_id, iteration));
        ensure_contract("verdict", errors)?;
        self.artifacts
            .write(run_id, iteration, ArtifactKind::Verdict, &verdict)?;

        self.ledger.add_iteration(run_id, iteration, verdict.status)?;
        self.ledger.upsert_run(run_id, goal, verdict.status.into())?;
        info!(
            iteration,
            status = verdict.status.as_str(),
            stop_reason = verdict.stop_reason().unwrap_or(""),
            "iteration closed"
        );
        Ok(StepOutcome {
            run_id: run_id.to_string(),
            iteration,
            tasks_executed,
            tasks_failed: 0,
            verdict,
        })
    }
}

/// Replace a `continue` verdict in the last permitted iteration.
fn exhausted(verdict: Verdict, max_iterations: u32) -> Verdict {
    let suggested = verdict
        .next
        .map(|next| next.suggested_tasks)
        .unwrap_or_default();
    let mut stopped = Verdict::stopped(
        &verdict.run_id,
        verdict.iteration,
        format!("Reached max iterations for this invocation ({max_iterations})"),
        stop_reason::MAX_ITERATIONS,
    );
    if let Some(next) = stopped.next.as_mut() {
        next.suggested_tasks = suggested;
    }
    stopped
}

fn ensure_contract(artifact: &'static str, errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        return Ok(());
    }
    Err(ContractViolation { artifact, errors }.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::VerdictNext;

    #[test]
    fn exhausted_keeps_suggestions() {
        let verdict = Verdict {
            run_id: "run-1".to_string(),
            iteration: 4,
            created_at: Utc::now(),
            status: VerdictStatus::Continue,
            rationale: "more to do".to_string(),
            next: Some(VerdictNext {
                suggested_tasks: vec!["tool: verify".to_string()],
                stop_reason: None,
            }),
        };

        let stopped = exhausted(verdict, 5);
        assert_eq!(stopped.status, VerdictStatus::Stopped);
        assert_eq!(stopped.iteration, 4);
        assert_eq!(stopped.stop_reason(), Some(stop_reason::MAX_ITERATIONS));
        assert_eq!(
            stopped.rationale,
            "Reached max iterations for this invocation (5)"
        );
        assert_eq!(
            stopped.next.expect("next").suggested_tasks,
            vec!["tool: verify".to_string()]
        );
    }

    #[test]
    fn ensure_contract_wraps_violation() {
        assert!(ensure_contract("plan", Vec::new()).is_ok());
        let err = ensure_contract("plan", vec!["bad".to_string()]).expect_err("violation");
        let violation = err.downcast_ref::<ContractViolation>().expect("typed");
        assert_eq!(violation.artifact, "plan");
    }
}
