//! Run ledger: durable run status and completed-iteration bookkeeping.
//!
//! Backed by SQLite at `.autoloop/state/ledger.db`. Every operation opens its
//! own connection, so no lock is held across iterations, and every write is an
//! idempotent upsert keyed by run (and iteration).

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::core::types::{RunStatus, Timestamp, VerdictStatus};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    goal TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS iterations (
    run_id TEXT NOT NULL,
    iteration INTEGER NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (run_id, iteration)
);
";

/// Ledger row for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: String,
    pub goal: String,
    pub status: RunStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Latest completed iteration, if any.
    pub latest_iteration: Option<u32>,
}

/// Bookkeeping consulted for resumption and status reporting.
pub trait RunLedger {
    /// Create the run or update its goal and status, keeping `created_at`.
    fn upsert_run(&self, run_id: &str, goal: &str, status: RunStatus) -> Result<()>;
    /// Record a completed iteration; repeating a call replaces the row.
    fn add_iteration(&self, run_id: &str, iteration: u32, status: VerdictStatus) -> Result<()>;
    fn latest_iteration(&self, run_id: &str) -> Result<Option<u32>>;
    fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>>;
}

#[derive(Debug, Clone)]
pub struct SqliteLedger {
    path: PathBuf,
}

impl SqliteLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let conn = Connection::open(&self.path)
            .with_context(|| format!("open ledger {}", self.path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set ledger busy timeout")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("create ledger tables")?;
        Ok(conn)
    }
}

impl RunLedger for SqliteLedger {
    fn upsert_run(&self, run_id: &str, goal: &str, status: RunStatus) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO runs (run_id, goal, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(run_id) DO UPDATE SET
                 goal = excluded.goal,
                 status = excluded.status,
                 updated_at = excluded.updated_at",
            params![run_id, goal, status.as_str(), now],
        )
        .with_context(|| format!("upsert run {run_id}"))?;
        debug!(run_id, status = status.as_str(), "run upserted");
        Ok(())
    }

    fn add_iteration(&self, run_id: &str, iteration: u32, status: VerdictStatus) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR REPLACE INTO iterations (run_id, iteration, status, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![run_id, iteration, status.as_str(), now],
        )
        .with_context(|| format!("record iteration {iteration} of run {run_id}"))?;
        debug!(run_id, iteration, status = status.as_str(), "iteration recorded");
        Ok(())
    }

    fn latest_iteration(&self, run_id: &str) -> Result<Option<u32>> {
        let conn = self.connect()?;
        latest_iteration_with(&conn, run_id)
    }

    fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                "SELECT goal, status, created_at, updated_at FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .with_context(|| format!("load run {run_id}"))?;
        let Some((goal, status, created_at, updated_at)) = row else {
            return Ok(None);
        };
        let status = RunStatus::parse(&status)
            .ok_or_else(|| anyhow!("run {run_id} has unknown status '{status}'"))?;
        Ok(Some(RunRecord {
            run_id: run_id.to_string(),
            goal,
            status,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
            latest_iteration: latest_iteration_with(&conn, run_id)?,
        }))
    }
}

fn latest_iteration_with(conn: &Connection, run_id: &str) -> Result<Option<u32>> {
    conn.query_row(
        "SELECT MAX(iteration) FROM iterations WHERE run_id = ?1",
        params![run_id],
        |row| row.get::<_, Option<u32>>(0),
    )
    .with_context(|| format!("query latest iteration of run {run_id}"))
}

fn parse_timestamp(raw: &str) -> Result<Timestamp> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .with_context(|| format!("parse ledger timestamp '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> (tempfile::TempDir, SqliteLedger) {
        let temp = tempfile::tempdir().expect("tempdir");
        let ledger = SqliteLedger::new(temp.path().join("state").join("ledger.db"));
        (temp, ledger)
    }

    #[test]
    fn latest_iteration_is_none_for_unknown_run() {
        let (_temp, ledger) = ledger();
        assert_eq!(ledger.latest_iteration("missing").expect("query"), None);
        assert_eq!(ledger.get_run("missing").expect("query"), None);
    }

    #[test]
    fn latest_iteration_tracks_max() {
        let (_temp, ledger) = ledger();
        ledger
            .add_iteration("run-1", 0, VerdictStatus::Continue)
            .expect("add");
        ledger
            .add_iteration("run-1", 2, VerdictStatus::Continue)
            .expect("add");
        ledger
            .add_iteration("run-2", 7, VerdictStatus::Done)
            .expect("add");
        assert_eq!(ledger.latest_iteration("run-1").expect("query"), Some(2));
    }

    #[test]
    fn upsert_is_idempotent_and_keeps_created_at() {
        let (_temp, ledger) = ledger();
        ledger
            .upsert_run("run-1", "goal", RunStatus::Running)
            .expect("insert");
        let first = ledger.get_run("run-1").expect("get").expect("present");

        ledger
            .upsert_run("run-1", "goal", RunStatus::Done)
            .expect("update");
        ledger
            .upsert_run("run-1", "goal", RunStatus::Done)
            .expect("repeat");
        let second = ledger.get_run("run-1").expect("get").expect("present");

        assert_eq!(second.status, RunStatus::Done);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
    }

    #[test]
    fn add_iteration_replaces_existing_row() {
        let (_temp, ledger) = ledger();
        ledger
            .upsert_run("run-1", "goal", RunStatus::Running)
            .expect("insert");
        ledger
            .add_iteration("run-1", 0, VerdictStatus::Continue)
            .expect("add");
        ledger
            .add_iteration("run-1", 0, VerdictStatus::Failed)
            .expect("replace");

        let record = ledger.get_run("run-1").expect("get").expect("present");
        assert_eq!(record.latest_iteration, Some(0));
    }
}
