//! Side-effecting collaborators: filesystem, subprocesses, storage.

pub mod artifacts;
pub mod config;
pub mod context;
pub mod git;
pub mod ledger;
pub mod paths;
pub mod process;
pub mod ripgrep;
pub mod run_id;
pub mod schema;
pub mod task_exec;
