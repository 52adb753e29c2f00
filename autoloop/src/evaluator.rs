//! Evaluator: inspects a plan and its results and closes the iteration.

use anyhow::Result;
use chrono::Utc;

use crate::core::types::{Plan, Results, TaskOp, Verdict, VerdictNext, VerdictStatus, stop_reason};

/// Produces the verdict for one iteration.
///
/// `results` must answer `plan` one-to-one.
pub trait Evaluator {
    fn evaluate(&self, goal: &str, plan: &Plan, results: &Results) -> Result<Verdict>;
}

/// Conservative reference policy.
///
/// 1. Any failed task fails the run (`task-failed`).
/// 2. A successful `verify` task completes it.
/// 3. A plan of only no-ops completes it (nothing left to do).
/// 4. Otherwise continue and suggest verifying.
///
/// Rule 2 accepts any successful `verify` result; with several verify tasks
/// in one plan, rule 1 already guarantees they all succeeded.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEvaluator;

impl Evaluator for RuleEvaluator {
    fn evaluate(&self, _goal: &str, plan: &Plan, results: &Results) -> Result<Verdict> {
        let verdict = |status, rationale: String, next| Verdict {
            run_id: plan.run_id.clone(),
            iteration: plan.iteration,
            created_at: Utc::now(),
            status,
            rationale,
            next,
        };

        let failed: Vec<&str> = results
            .task_results
            .iter()
            .filter(|r| !r.outcome.ok)
            .map(|r| r.task_id.as_str())
            .collect();
        if !failed.is_empty() {
            return Ok(verdict(
                VerdictStatus::Failed,
                format!("Task(s) failed: {}", failed.join(", ")),
                Some(VerdictNext {
                    suggested_tasks: Vec::new(),
                    stop_reason: Some(stop_reason::TASK_FAILED.to_string()),
                }),
            ));
        }

        let verified = plan
            .tasks
            .iter()
            .zip(&results.task_results)
            .any(|(task, result)| matches!(task.op, TaskOp::Verify(_)) && result.outcome.ok);
        if verified {
            return Ok(verdict(
                VerdictStatus::Done,
                "Verification succeeded".to_string(),
                None,
            ));
        }

        if plan.tasks.iter().all(|task| task.op == TaskOp::Noop) {
            return Ok(verdict(
                VerdictStatus::Done,
                "Noop plan succeeded; work is complete".to_string(),
                None,
            ));
        }

        Ok(verdict(
            VerdictStatus::Continue,
            "Tasks completed; verification still pending".to_string(),
            Some(VerdictNext {
                suggested_tasks: vec!["tool: verify".to_string()],
                stop_reason: None,
            }),
        ))
    }
}
