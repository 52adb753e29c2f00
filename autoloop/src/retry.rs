//! Retry Coordinator: bounded retries with exponential backoff around one task.
//!
//! Only faults (`Err`) are retried. A task that returns `ok: false` failed
//! deterministically and is reported as-is on the first attempt.

use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::core::types::{Task, TaskError, TaskOutcome, TaskResult};
use crate::io::task_exec::TaskRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt with 0-based index `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Blocks the calling thread between attempts.
pub trait Sleeper {
    fn sleep(&self, delay: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        thread::sleep(delay);
    }
}

/// Run `task` until it returns normally or the attempts are exhausted.
///
/// Exhaustion yields `ok: false` carrying the last fault's message and trace.
/// Logs from failed attempts are kept ahead of the final attempt's logs.
pub fn execute_with_retry<R, S>(
    runner: &R,
    task: &Task,
    policy: &RetryPolicy,
    sleeper: &S,
) -> TaskResult
where
    R: TaskRunner + ?Sized,
    S: Sleeper + ?Sized,
{
    let started_at = Utc::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut fault_logs = Vec::new();
    let mut last_fault = None;

    for attempt in 0..max_attempts {
        match runner.run(task) {
            Ok(mut outcome) => {
                if !fault_logs.is_empty() {
                    fault_logs.append(&mut outcome.logs);
                    outcome.logs = fault_logs;
                }
                debug!(task_id = %task.id, attempt, ok = outcome.ok, "task returned");
                return TaskResult {
                    task_id: task.id.clone(),
                    outcome,
                };
            }
            Err(err) => {
                warn!(task_id = %task.id, attempt, err = %format!("{err:#}"), "task attempt failed");
                fault_logs.push(format!("attempt {} failed: {err:#}", attempt + 1));
                if attempt + 1 < max_attempts {
                    let delay = policy.delay_after(attempt);
                    debug!(task_id = %task.id, delay_ms = delay.as_millis() as u64, "backing off");
                    sleeper.sleep(delay);
                }
                last_fault = Some(err);
            }
        }
    }

    let error = match last_fault {
        Some(err) => TaskError {
            message: format!("{err:#}"),
            trace: Some(format!("{err:?}")),
        },
        None => TaskError {
            message: "task made no attempts".to_string(),
            trace: None,
        },
    };
    warn!(task_id = %task.id, attempts = max_attempts, "task retries exhausted");
    TaskResult {
        task_id: task.id.clone(),
        outcome: TaskOutcome {
            ok: false,
            started_at,
            finished_at: Utc::now(),
            output: None,
            error: Some(error),
            logs: fault_logs,
        },
    }
}
