//! Autonomous iteration harness.
//!
//! Given a goal, the harness repeatedly plans tasks, executes them against the
//! local environment, evaluates the outcome, and decides whether to continue,
//! stop, or fail. Every stage is persisted as a write-once artifact and the
//! run's progress is tracked in a ledger, so runs can be resumed and audited.
//!
//! - **[`core`]**: pure, deterministic logic (data model, contracts, allowlist).
//! - **[`io`]**: side effects (filesystem, subprocesses, artifact store, ledger).
//!
//! Orchestration lives in [`retry`], [`planner`], [`evaluator`], [`step`], and
//! [`looping`].

pub mod core;
pub mod evaluator;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod planner;
pub mod retry;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
