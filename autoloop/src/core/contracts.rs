//! Structural invariants for plans, results, and verdicts that JSON Schema
//! cannot express (identity, uniqueness, one-to-one correspondence).

use std::collections::HashSet;
use std::fmt;

use crate::core::types::{Plan, Results, Verdict, VerdictStatus};

/// A produced artifact failed its contract. Fatal to the run, never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractViolation {
    pub artifact: &'static str,
    pub errors: Vec<String>,
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} contract violated:\n- {}",
            self.artifact,
            self.errors.join("\n- ")
        )
    }
}

impl std::error::Error for ContractViolation {}

/// Check a freshly produced plan against the iteration it was requested for.
pub fn plan_violations(plan: &Plan, run_id: &str, iteration: u32) -> Vec<String> {
    let mut errors = identity_violations(&plan.run_id, plan.iteration, run_id, iteration);

    if plan.tasks.is_empty() {
        errors.push("plan must contain at least one task".to_string());
    }

    let mut seen = HashSet::new();
    for (index, task) in plan.tasks.iter().enumerate() {
        if task.id.trim().is_empty() {
            errors.push(format!("task at index {index} has an empty id"));
            continue;
        }
        if !seen.insert(task.id.as_str()) {
            errors.push(format!("duplicate task id '{}'", task.id));
        }
    }
    errors
}

/// Check that results answer `plan` one-to-one, in plan order.
pub fn results_violations(plan: &Plan, results: &Results) -> Vec<String> {
    let mut errors =
        identity_violations(&results.run_id, results.iteration, &plan.run_id, plan.iteration);

    if results.task_results.len() != plan.tasks.len() {
        errors.push(format!(
            "expected {} task results, got {}",
            plan.tasks.len(),
            results.task_results.len()
        ));
    }

    for (index, (task, result)) in plan.tasks.iter().zip(&results.task_results).enumerate() {
        if task.id != result.task_id {
            errors.push(format!(
                "task result {index} references '{}' but plan task is '{}'",
                result.task_id, task.id
            ));
        }
        if !result.outcome.ok && result.outcome.error.is_none() {
            errors.push(format!(
                "failed task result '{}' is missing an error",
                result.task_id
            ));
        }
    }
    errors
}

pub fn verdict_violations(verdict: &Verdict, run_id: &str, iteration: u32) -> Vec<String> {
    let mut errors = identity_violations(&verdict.run_id, verdict.iteration, run_id, iteration);
    if verdict.rationale.trim().is_empty() {
        errors.push("verdict rationale must not be empty".to_string());
    }
    if verdict.status == VerdictStatus::Stopped && verdict.stop_reason().is_none() {
        errors.push("stopped verdict must carry a stop reason".to_string());
    }
    errors
}

fn identity_violations(
    actual_run: &str,
    actual_iteration: u32,
    expected_run: &str,
    expected_iteration: u32,
) -> Vec<String> {
    let mut errors = Vec::new();
    if actual_run != expected_run {
        errors.push(format!(
            "runId '{actual_run}' does not match '{expected_run}'"
        ));
    }
    if actual_iteration != expected_iteration {
        errors.push(format!(
            "iteration {actual_iteration} does not match {expected_iteration}"
        ));
    }
    errors
}
