//! Stable exit codes for autoloop CLI commands.

/// Command succeeded; for `run`, the loop ended on any verdict.
pub const OK: i32 = 0;
/// Unhandled fault, invalid config or run id, or a contract violation.
pub const FAILURE: i32 = 1;
/// `run` was interrupted before any iteration started.
pub const INTERRUPTED: i32 = 130;
