//! Loop-level tests for the iteration controller.
//!
//! These drive `run_loop` over a temporary workspace with scripted planner,
//! task runner, and evaluator, then inspect the persisted artifacts and the
//! ledger to check resumption, termination, and failure handling.

use std::cell::Cell;
use std::time::Duration;

use anyhow::anyhow;
use autoloop::core::contracts::ContractViolation;
use autoloop::core::types::{
    Plan, Results, RunStatus, TaskOutcome, Verdict, VerdictStatus, stop_reason,
};
use autoloop::evaluator::RuleEvaluator;
use autoloop::io::artifacts::ArtifactKind;
use autoloop::io::ledger::RunLedger;
use autoloop::looping::LoopRequest;
use autoloop::test_support::{
    ScriptedEvaluator, ScriptedPlanner, ScriptedTaskRunner, TestWorkspace, noop_task,
};
use chrono::Utc;

const RUN: &str = "run-1";

fn request(max_iterations: u32) -> LoopRequest {
    LoopRequest {
        run_id: RUN.to_string(),
        goal: "ship it".to_string(),
        max_iterations,
        dry_run: false,
    }
}

#[test]
fn dry_run_persists_plan_and_stops_without_executing() {
    let ws = TestWorkspace::new();
    let harness = ws.harness(
        ScriptedPlanner::noop(),
        ScriptedTaskRunner::default(),
        ScriptedEvaluator::always(VerdictStatus::Done),
    );
    let mut req = request(5);
    req.dry_run = true;

    let outcome = harness.run_loop(&req, || false, |_| {}).expect("loop");

    assert_eq!(outcome.iterations_executed, 1);
    assert_eq!(outcome.final_verdict.status, VerdictStatus::Stopped);
    assert_eq!(outcome.final_verdict.stop_reason(), Some(stop_reason::DRY_RUN));
    assert_eq!(outcome.final_verdict.rationale, "Dry-run requested");
    assert_eq!(harness.tasks.calls(), 0);

    let artifacts = ws.artifacts();
    assert!(artifacts.exists(RUN, 0, ArtifactKind::Plan));
    assert!(!artifacts.exists(RUN, 0, ArtifactKind::Results));
    assert!(artifacts.exists(RUN, 0, ArtifactKind::Verdict));

    let record = ws.ledger().get_run(RUN).expect("get").expect("run");
    assert_eq!(record.status, RunStatus::Stopped);
    assert_eq!(record.latest_iteration, Some(0));
}

#[test]
fn last_permitted_iteration_stops_with_max_iterations() {
    let ws = TestWorkspace::new();
    let harness = ws.harness(
        ScriptedPlanner::noop(),
        ScriptedTaskRunner::default(),
        ScriptedEvaluator::always(VerdictStatus::Continue),
    );

    let mut statuses = Vec::new();
    let outcome = harness
        .run_loop(&request(2), || false, |step| {
            statuses.push((step.iteration, step.verdict.status));
        })
        .expect("loop");

    assert_eq!(
        statuses,
        vec![(0, VerdictStatus::Continue), (1, VerdictStatus::Stopped)]
    );
    let verdict = &outcome.final_verdict;
    assert_eq!(verdict.iteration, 1);
    assert_eq!(verdict.stop_reason(), Some(stop_reason::MAX_ITERATIONS));
    assert_eq!(
        verdict.rationale,
        "Reached max iterations for this invocation (2)"
    );
    assert_eq!(
        verdict.next.as_ref().expect("next").suggested_tasks,
        vec!["keep going".to_string()]
    );

    let persisted: Verdict = ws
        .artifacts()
        .read(RUN, 1, ArtifactKind::Verdict)
        .expect("read verdict");
    assert_eq!(&persisted, verdict);
    assert_eq!(ws.ledger().latest_iteration(RUN).expect("latest"), Some(1));
}

#[test]
fn resumes_after_latest_completed_iteration() {
    let ws = TestWorkspace::new();
    let first = ws.harness(
        ScriptedPlanner::noop(),
        ScriptedTaskRunner::default(),
        ScriptedEvaluator::always(VerdictStatus::Continue),
    );
    first.run_loop(&request(2), || false, |_| {}).expect("first");
    let earlier: Verdict = ws
        .artifacts()
        .read(RUN, 1, ArtifactKind::Verdict)
        .expect("read verdict");

    let second = ws.harness(
        ScriptedPlanner::noop(),
        ScriptedTaskRunner::default(),
        ScriptedEvaluator::always(VerdictStatus::Done),
    );
    let outcome = second.run_loop(&request(3), || false, |_| {}).expect("second");

    assert_eq!(outcome.started_at_iteration, 2);
    assert_eq!(outcome.iterations_executed, 1);
    assert_eq!(outcome.final_verdict.status, VerdictStatus::Done);
    let planned: Vec<u32> = second
        .planner
        .requests()
        .iter()
        .map(|r| r.iteration)
        .collect();
    assert_eq!(planned, vec![2]);

    let unchanged: Verdict = ws
        .artifacts()
        .read(RUN, 1, ArtifactKind::Verdict)
        .expect("reread verdict");
    assert_eq!(unchanged, earlier);

    let record = ws.ledger().get_run(RUN).expect("get").expect("run");
    assert_eq!(record.status, RunStatus::Done);
    assert_eq!(record.latest_iteration, Some(2));
}

#[test]
fn interrupt_before_first_iteration_closes_it_stopped() {
    let ws = TestWorkspace::new();
    let harness = ws.harness(
        ScriptedPlanner::noop(),
        ScriptedTaskRunner::default(),
        ScriptedEvaluator::always(VerdictStatus::Done),
    );

    let outcome = harness.run_loop(&request(5), || true, |_| {}).expect("loop");

    let verdict = &outcome.final_verdict;
    assert_eq!(verdict.iteration, 0);
    assert_eq!(verdict.status, VerdictStatus::Stopped);
    assert_eq!(verdict.stop_reason(), Some(stop_reason::USER_INTERRUPT));
    assert_eq!(verdict.rationale, "Interrupted by user");
    assert!(harness.planner.requests().is_empty());
    assert!(!ws.artifacts().exists(RUN, 0, ArtifactKind::Plan));
    assert!(ws.artifacts().exists(RUN, 0, ArtifactKind::Verdict));
}

#[test]
fn interrupt_is_honoured_between_iterations() {
    let ws = TestWorkspace::new();
    let harness = ws.harness(
        ScriptedPlanner::noop(),
        ScriptedTaskRunner::default(),
        ScriptedEvaluator::always(VerdictStatus::Continue),
    );
    let polls = Cell::new(0u32);

    let outcome = harness
        .run_loop(
            &request(5),
            || {
                polls.set(polls.get() + 1);
                polls.get() > 1
            },
            |_| {},
        )
        .expect("loop");

    assert_eq!(outcome.iterations_executed, 2);
    assert_eq!(outcome.final_verdict.iteration, 1);
    assert_eq!(
        outcome.final_verdict.stop_reason(),
        Some(stop_reason::USER_INTERRUPT)
    );
    assert_eq!(harness.tasks.calls(), 1);
}

#[test]
fn empty_plan_is_a_contract_violation_and_fails_the_run() {
    let ws = TestWorkspace::new();
    let harness = ws.harness(
        ScriptedPlanner::with_tasks(vec![Vec::new()]),
        ScriptedTaskRunner::default(),
        ScriptedEvaluator::always(VerdictStatus::Done),
    );

    let err = harness
        .run_loop(&request(3), || false, |_| {})
        .expect_err("violation");

    let violation = err.downcast_ref::<ContractViolation>().expect("typed");
    assert_eq!(violation.artifact, "plan");
    assert!(!violation.errors.is_empty());
    assert!(!ws.artifacts().exists(RUN, 0, ArtifactKind::Plan));

    let record = ws.ledger().get_run(RUN).expect("get").expect("run");
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.latest_iteration, None);
}

#[test]
fn mismatched_verdict_is_a_contract_violation() {
    let ws = TestWorkspace::new();
    let mut evaluator = ScriptedEvaluator::always(VerdictStatus::Done);
    evaluator.force_iteration = Some(7);
    let harness = ws.harness(
        ScriptedPlanner::noop(),
        ScriptedTaskRunner::default(),
        evaluator,
    );

    let err = harness
        .run_loop(&request(3), || false, |_| {})
        .expect_err("violation");

    let violation = err.downcast_ref::<ContractViolation>().expect("typed");
    assert_eq!(violation.artifact, "verdict");
    assert!(!ws.artifacts().exists(RUN, 0, ArtifactKind::Verdict));
    assert!(!ws.artifacts().exists(RUN, 7, ArtifactKind::Verdict));
    let record = ws.ledger().get_run(RUN).expect("get").expect("run");
    assert_eq!(record.status, RunStatus::Failed);
}

#[test]
fn results_answer_every_task_in_order_with_retried_faults() {
    let ws = TestWorkspace::new();
    let harness = ws.harness(
        ScriptedPlanner::with_tasks(vec![vec![
            noop_task("a"),
            noop_task("b"),
            noop_task("c"),
        ]]),
        ScriptedTaskRunner::new(vec![
            Ok(TaskOutcome::succeeded(Utc::now())),
            Err(anyhow!("flaky")),
            Ok(TaskOutcome::succeeded(Utc::now())),
            Ok(TaskOutcome::succeeded(Utc::now())),
        ]),
        ScriptedEvaluator::always(VerdictStatus::Done),
    );

    harness.run_loop(&request(1), || false, |_| {}).expect("loop");

    assert_eq!(harness.tasks.seen_task_ids(), vec!["a", "b", "b", "c"]);
    assert_eq!(harness.sleeper.delays(), vec![Duration::from_millis(100)]);

    let artifacts = ws.artifacts();
    let plan: Plan = artifacts.read(RUN, 0, ArtifactKind::Plan).expect("plan");
    let results: Results = artifacts
        .read(RUN, 0, ArtifactKind::Results)
        .expect("results");
    let plan_ids: Vec<&str> = plan.tasks.iter().map(|t| t.id.as_str()).collect();
    let result_ids: Vec<&str> = results
        .task_results
        .iter()
        .map(|r| r.task_id.as_str())
        .collect();
    assert_eq!(plan_ids, result_ids);
    assert!(results.task_results.iter().all(|r| r.outcome.ok));
    assert_eq!(
        results.task_results[1].outcome.logs,
        vec!["attempt 1 failed: flaky".to_string()]
    );
}

#[test]
fn logical_failure_fails_the_run_without_retry() {
    let ws = TestWorkspace::new();
    let harness = ws.harness(
        ScriptedPlanner::noop(),
        ScriptedTaskRunner::new(vec![Ok(TaskOutcome::failed(Utc::now(), "boom"))]),
        RuleEvaluator,
    );

    let outcome = harness.run_loop(&request(5), || false, |_| {}).expect("loop");

    assert_eq!(harness.tasks.calls(), 1);
    assert!(harness.sleeper.delays().is_empty());
    assert_eq!(outcome.iterations_executed, 1);
    assert_eq!(outcome.final_verdict.status, VerdictStatus::Failed);
    assert_eq!(
        outcome.final_verdict.stop_reason(),
        Some(stop_reason::TASK_FAILED)
    );
    let record = ws.ledger().get_run(RUN).expect("get").expect("run");
    assert_eq!(record.status, RunStatus::Failed);
}
