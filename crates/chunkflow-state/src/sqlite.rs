//! `SQLite`-backed implementation of [`StateBackend`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDateTime, Utc};
use chunkflow_types::{ExecutionStatus, JobName, RunSummary, StepCheckpoint, StepName};
use rusqlite::Connection;

use crate::backend::{RunRecord, StateBackend};
use crate::error::{self, StateError};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Idempotent DDL for state tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS step_checkpoints (
    job TEXT NOT NULL,
    step TEXT NOT NULL,
    items_read INTEGER NOT NULL,
    items_written INTEGER NOT NULL,
    items_skipped INTEGER NOT NULL,
    chunks_committed INTEGER NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (job, step)
);

CREATE TABLE IF NOT EXISTS batch_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL DEFAULT (datetime('now')),
    finished_at TEXT,
    items_read INTEGER DEFAULT 0,
    items_written INTEGER DEFAULT 0,
    items_skipped INTEGER DEFAULT 0,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_batch_runs_job ON batch_runs (job, id);
";

/// `SQLite`-backed state storage.
///
/// Create with [`SqliteStateBackend::open`] for file-backed persistence
/// or [`SqliteStateBackend::in_memory`] for tests.
pub struct SqliteStateBackend {
    conn: Mutex<Connection>,
}

impl SqliteStateBackend {
    /// Open or create a `SQLite` state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory `SQLite` backend (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Convert a `SQLite` datetime string to ISO-8601.
    fn sqlite_to_iso8601(raw: &str) -> String {
        NaiveDateTime::parse_from_str(raw, SQLITE_DATETIME_FMT).map_or_else(
            |_| raw.to_string(),
            |ndt| format!("{}Z", ndt.format("%Y-%m-%dT%H:%M:%S")),
        )
    }

    /// Convert an ISO-8601 string to `SQLite` datetime format.
    fn iso8601_to_sqlite(iso: &str) -> String {
        chrono::DateTime::parse_from_rfc3339(iso).map_or_else(
            |_| iso.to_string(),
            |dt| dt.format(SQLITE_DATETIME_FMT).to_string(),
        )
    }

    /// Format current UTC time as ISO-8601 for checkpoint stamps.
    #[must_use]
    pub fn now_iso8601() -> String {
        Utc::now().to_rfc3339()
    }
}

impl StateBackend for SqliteStateBackend {
    fn get_checkpoint(
        &self,
        job: &JobName,
        step: &StepName,
    ) -> error::Result<Option<StepCheckpoint>> {
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            "SELECT items_read, items_written, items_skipped, chunks_committed, updated_at \
             FROM step_checkpoints WHERE job = ?1 AND step = ?2",
            rusqlite::params![job.as_str(), step.as_str()],
            |row| {
                let items_read: i64 = row.get(0)?;
                let items_written: i64 = row.get(1)?;
                let items_skipped: i64 = row.get(2)?;
                let chunks_committed: i64 = row.get(3)?;
                let updated_at: String = row.get(4)?;
                Ok((
                    items_read,
                    items_written,
                    items_skipped,
                    chunks_committed,
                    updated_at,
                ))
            },
        );

        match result {
            Ok((read, written, skipped, chunks, updated_at)) => Ok(Some(StepCheckpoint {
                items_read: read.unsigned_abs(),
                items_written: written.unsigned_abs(),
                items_skipped: skipped.unsigned_abs(),
                chunks_committed: chunks.unsigned_abs(),
                updated_at: Self::sqlite_to_iso8601(&updated_at),
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StateError::Sqlite(e)),
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn set_checkpoint(
        &self,
        job: &JobName,
        step: &StepName,
        checkpoint: &StepCheckpoint,
    ) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let updated_at = Self::iso8601_to_sqlite(&checkpoint.updated_at);
        conn.execute(
            "INSERT INTO step_checkpoints \
             (job, step, items_read, items_written, items_skipped, chunks_committed, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(job, step) \
             DO UPDATE SET items_read = ?3, items_written = ?4, items_skipped = ?5, \
             chunks_committed = ?6, updated_at = ?7",
            rusqlite::params![
                job.as_str(),
                step.as_str(),
                checkpoint.items_read as i64,
                checkpoint.items_written as i64,
                checkpoint.items_skipped as i64,
                checkpoint.chunks_committed as i64,
                updated_at,
            ],
        )?;
        Ok(())
    }

    fn clear_checkpoint(&self, job: &JobName, step: &StepName) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "DELETE FROM step_checkpoints WHERE job = ?1 AND step = ?2",
            rusqlite::params![job.as_str(), step.as_str()],
        )?;
        Ok(())
    }

    fn start_run(&self, job: &JobName) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO batch_runs (job, status) VALUES (?1, ?2)",
            rusqlite::params![job.as_str(), ExecutionStatus::Running.as_str()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_run(
        &self,
        run_id: i64,
        status: ExecutionStatus,
        summary: &RunSummary,
    ) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE batch_runs SET status = ?1, finished_at = datetime('now'), \
             items_read = ?2, items_written = ?3, items_skipped = ?4, error_message = ?5 \
             WHERE id = ?6",
            rusqlite::params![
                status.as_str(),
                summary.items_read as i64,
                summary.items_written as i64,
                summary.items_skipped as i64,
                summary.error_message,
                run_id,
            ],
        )?;
        Ok(())
    }

    fn recent_runs(&self, job: &JobName, limit: u32) -> error::Result<Vec<RunRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, status, started_at, finished_at, \
             items_read, items_written, items_skipped, error_message \
             FROM batch_runs WHERE job = ?1 ORDER BY id DESC LIMIT ?2",
        )?;

        let rows = stmt.query_map(rusqlite::params![job.as_str(), limit], |row| {
            let run_id: i64 = row.get(0)?;
            let status: String = row.get(1)?;
            let started_at: String = row.get(2)?;
            let finished_at: Option<String> = row.get(3)?;
            let items_read: i64 = row.get(4)?;
            let items_written: i64 = row.get(5)?;
            let items_skipped: i64 = row.get(6)?;
            let error_message: Option<String> = row.get(7)?;
            Ok((
                run_id,
                status,
                started_at,
                finished_at,
                items_read,
                items_written,
                items_skipped,
                error_message,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (run_id, status, started_at, finished_at, read, written, skipped, error_message) =
                row?;
            let status = ExecutionStatus::parse(&status).ok_or_else(|| {
                StateError::UnknownStatus {
                    run_id,
                    status: status.clone(),
                }
            })?;
            records.push(RunRecord {
                run_id,
                job: job.clone(),
                status,
                started_at: Self::sqlite_to_iso8601(&started_at),
                finished_at: finished_at.as_deref().map(Self::sqlite_to_iso8601),
                summary: RunSummary {
                    items_read: read.unsigned_abs(),
                    items_written: written.unsigned_abs(),
                    items_skipped: skipped.unsigned_abs(),
                    error_message,
                },
            });
        }
        Ok(records)
    }
}
