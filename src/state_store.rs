//! Component E: durable per-(run_id, paper_id) processing state.
//!
//! Grounded on this codebase's rusqlite-based repository layer
//! (`repository/document/crud.rs`, `repository/mod.rs`): a single
//! `rusqlite::Connection`, `thiserror`-wrapped `rusqlite::Error`,
//! `parse_datetime`-style RFC-3339 handling, and `INSERT ... ON CONFLICT
//! DO UPDATE` upserts rather than a connection pool — matching the
//! contract's "single connection serialized internally" requirement more
//! directly than this codebase's diesel/diesel-async pool, which is built
//! for concurrent multi-connection access this component does not need.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Checkpoint, ProcessingStatus, RunSummary};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    city TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    terminal_status TEXT,
    fetched INTEGER NOT NULL DEFAULT 0,
    processed INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    locations_extracted INTEGER NOT NULL DEFAULT 0,
    locations_geocoded INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS processing_state (
    run_id TEXT NOT NULL,
    paper_id TEXT NOT NULL,
    status TEXT NOT NULL,
    first_seen_at TEXT NOT NULL,
    last_update_at TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    PRIMARY KEY (run_id, paper_id)
);

CREATE INDEX IF NOT EXISTS idx_processing_state_paper ON processing_state (paper_id, status);

CREATE TABLE IF NOT EXISTS checkpoints (
    run_id TEXT NOT NULL,
    batch_seq INTEGER NOT NULL,
    last_completed_paper_id TEXT NOT NULL,
    written_at TEXT NOT NULL,
    PRIMARY KEY (run_id, batch_seq)
);
"#;

/// The state store is the trust root: one connection, serialized
/// internally by a mutex so the type stays `Sync` without requiring every
/// caller to reason about `rusqlite::Connection`'s `!Sync`-ness.
pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    pub fn open(path: &Path) -> Result<StateStore> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(StateStore { conn: Mutex::new(conn) })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<StateStore> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(StateStore { conn: Mutex::new(conn) })
    }

    pub fn begin_run(&self, city: &str) -> Result<String> {
        let run_id = Uuid::new_v4().to_string();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO runs (run_id, city, started_at) VALUES (?1, ?2, ?3)",
            params![run_id, city, Utc::now().to_rfc3339()],
        )?;
        Ok(run_id)
    }

    pub fn end_run(&self, run_id: &str, terminal_status: &str, summary: &RunSummary) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE runs SET ended_at = ?1, terminal_status = ?2, fetched = ?3, processed = ?4,
                failed = ?5, skipped = ?6, locations_extracted = ?7, locations_geocoded = ?8
             WHERE run_id = ?9",
            params![
                Utc::now().to_rfc3339(),
                terminal_status,
                summary.fetched,
                summary.processed,
                summary.failed,
                summary.skipped,
                summary.locations_extracted,
                summary.locations_geocoded,
                run_id,
            ],
        )?;
        Ok(())
    }

    /// Writes a status transition. Each mark is durable (SQLite commits
    /// synchronously on this connection) before the call returns.
    pub fn mark(&self, run_id: &str, paper_id: &str, status: ProcessingStatus, error: Option<&str>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO processing_state (run_id, paper_id, status, first_seen_at, last_update_at, last_error)
             VALUES (?1, ?2, ?3, ?4, ?4, ?5)
             ON CONFLICT(run_id, paper_id) DO UPDATE SET
                status = excluded.status,
                last_update_at = excluded.last_update_at,
                last_error = excluded.last_error,
                retry_count = processing_state.retry_count + (CASE WHEN excluded.status = 'pending' THEN 1 ELSE 0 END)",
            params![run_id, paper_id, status.as_str(), now, error],
        )?;
        Ok(())
    }

    /// Completion is monotonic across runs: a Paper is completed if ANY
    /// run has ever marked it completed.
    pub fn is_completed(&self, paper_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM processing_state WHERE paper_id = ?1 AND status = 'completed'",
            params![paper_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn write_checkpoint(&self, run_id: &str, batch_seq: u64, last_completed_paper_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO checkpoints (run_id, batch_seq, last_completed_paper_id, written_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(run_id, batch_seq) DO UPDATE SET
                last_completed_paper_id = excluded.last_completed_paper_id,
                written_at = excluded.written_at",
            params![run_id, batch_seq as i64, last_completed_paper_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn latest_checkpoint(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT run_id, batch_seq, last_completed_paper_id FROM checkpoints
                 WHERE run_id = ?1 ORDER BY batch_seq DESC LIMIT 1",
                params![run_id],
                |row| {
                    Ok(Checkpoint {
                        run_id: row.get(0)?,
                        batch_seq: row.get::<_, i64>(1)? as u64,
                        last_completed_paper_id: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn failed_paper_ids(&self, run_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT paper_id FROM processing_state WHERE run_id = ?1 AND status = 'failed'")?;
        let rows = stmt.query_map(params![run_id], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<String>>>().map_err(Into::into)
    }

    /// Explicit retry: moves `failed` back to `pending` for this run only.
    pub fn reset_failed(&self, run_id: &str) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE processing_state SET status = 'pending', last_update_at = ?2
             WHERE run_id = ?1 AND status = 'failed'",
            params![run_id, now],
        )?;
        Ok(changed as u64)
    }

    pub fn summarize(&self, run_id: &str) -> Result<RunSummary> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM processing_state WHERE run_id = ?1),
                (SELECT COUNT(*) FROM processing_state WHERE run_id = ?1 AND status = 'completed'),
                (SELECT COUNT(*) FROM processing_state WHERE run_id = ?1 AND status = 'failed'),
                (SELECT COUNT(*) FROM processing_state WHERE run_id = ?1 AND status = 'skipped')",
            params![run_id],
            |row| {
                Ok(RunSummary {
                    fetched: row.get::<_, i64>(0)? as u64,
                    processed: row.get::<_, i64>(1)? as u64,
                    failed: row.get::<_, i64>(2)? as u64,
                    skipped: row.get::<_, i64>(3)? as u64,
                    locations_extracted: 0,
                    locations_geocoded: 0,
                })
            },
        )
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_and_is_completed_round_trip() {
        let store = StateStore::open_in_memory().unwrap();
        let run_id = store.begin_run("augsburg").unwrap();
        store.mark(&run_id, "paper-1", ProcessingStatus::InProgress, None).unwrap();
        assert!(!store.is_completed("paper-1").unwrap());
        store.mark(&run_id, "paper-1", ProcessingStatus::Completed, None).unwrap();
        assert!(store.is_completed("paper-1").unwrap());
    }

    #[test]
    fn completion_is_monotonic_across_runs() {
        let store = StateStore::open_in_memory().unwrap();
        let run_a = store.begin_run("augsburg").unwrap();
        store.mark(&run_a, "paper-1", ProcessingStatus::Completed, None).unwrap();

        let run_b = store.begin_run("augsburg").unwrap();
        // A different run never touched paper-1, but completion persists.
        assert!(store.is_completed("paper-1").unwrap());
        assert_ne!(run_a, run_b);
    }

    #[test]
    fn checkpoint_round_trip() {
        let store = StateStore::open_in_memory().unwrap();
        let run_id = store.begin_run("augsburg").unwrap();
        assert!(store.latest_checkpoint(&run_id).unwrap().is_none());
        store.write_checkpoint(&run_id, 1, "paper-10").unwrap();
        store.write_checkpoint(&run_id, 2, "paper-20").unwrap();
        let cp = store.latest_checkpoint(&run_id).unwrap().unwrap();
        assert_eq!(cp.batch_seq, 2);
        assert_eq!(cp.last_completed_paper_id, "paper-20");
    }

    #[test]
    fn reset_failed_moves_back_to_pending_for_this_run_only() {
        let store = StateStore::open_in_memory().unwrap();
        let run_id = store.begin_run("augsburg").unwrap();
        store.mark(&run_id, "paper-1", ProcessingStatus::Failed, Some("boom")).unwrap();
        let changed = store.reset_failed(&run_id).unwrap();
        assert_eq!(changed, 1);
        assert_eq!(store.failed_paper_ids(&run_id).unwrap().len(), 0);
    }
}
