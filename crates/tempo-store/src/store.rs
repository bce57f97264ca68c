use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tempo_core::config::DatabaseConfig;
use tracing::{debug, instrument};

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::types::{format_ts, TaskRecord};

/// Port over the shared task record store.
///
/// Workers hold an `Arc<dyn TaskStore>` so deployments can swap the SQLite
/// implementation for another backend (and tests can inject failing stores).
/// All mutation goes through conditional updates — implementations must keep
/// the at-most-one-ticket invariant without any in-process locking across
/// workers.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert-or-merge the record for `id`.
    ///
    /// A fresh record starts at `initial_next_run` with no ticket. For an
    /// existing record only `settings_json` is overwritten: redefining a task
    /// must not reset its schedule or clear an in-flight claim.
    async fn upsert_settings(
        &self,
        id: &str,
        settings_json: &str,
        initial_next_run: DateTime<Utc>,
    ) -> Result<()>;

    /// The record for `id` iff it is currently claimable: `next_run_start_at`
    /// strictly in the past and no ticket held.
    async fn find_claimable(&self, id: &str, now: DateTime<Utc>) -> Result<Option<TaskRecord>>;

    /// Atomically take the execution ticket for `id`.
    ///
    /// Sets `current_run_ticket = ticket` only while the row still satisfies
    /// the claimable predicate — the compare-and-swap that serialises sibling
    /// workers. `false` means the race was lost (or the task is no longer
    /// due); the caller must not execute.
    async fn claim(&self, id: &str, ticket: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Clear the ticket and install the next schedule in one update.
    async fn release(&self, id: &str, next_run_start_at: DateTime<Utc>) -> Result<()>;

    /// Plain read of the record for `id`, claimed or not.
    async fn fetch(&self, id: &str) -> Result<Option<TaskRecord>>;

    /// All known records ordered by id.
    async fn list(&self) -> Result<Vec<TaskRecord>>;

    /// Delete the record for `id`. Returns `false` if nothing was deleted.
    async fn remove(&self, id: &str) -> Result<bool>;
}

/// SQLite-backed [`TaskStore`].
///
/// Wraps a single connection in a `Mutex` (statements here are short and
/// never held across awaits). Cross-process exclusion does not depend on
/// this lock — it comes from the conditional updates themselves, so any
/// number of processes can share the database file.
pub struct SqliteTaskStore {
    db: Mutex<Connection>,
}

impl SqliteTaskStore {
    /// Wrap a connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Open (creating if absent) the configured database file.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let parent = std::path::Path::new(&config.path).parent();
        if let Some(parent) = parent.filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&config.path)?;
        Self::new(conn)
    }

    /// Fresh in-memory store. Each call returns an independent database.
    pub fn in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRecord> {
    Ok(TaskRecord {
        id: row.get(0)?,
        settings_json: row.get(1)?,
        next_run_start_at: row.get(2)?,
        current_run_ticket: row.get(3)?,
    })
}

const RECORD_COLUMNS: &str = "id, settings_json, next_run_start_at, current_run_ticket";

#[async_trait]
impl TaskStore for SqliteTaskStore {
    #[instrument(skip_all, fields(id = %id))]
    async fn upsert_settings(
        &self,
        id: &str,
        settings_json: &str,
        initial_next_run: DateTime<Utc>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO tasks (id, settings_json, next_run_start_at, current_run_ticket)
             VALUES (?1, ?2, ?3, NULL)
             ON CONFLICT(id) DO UPDATE SET settings_json = excluded.settings_json",
            rusqlite::params![id, settings_json, format_ts(initial_next_run)],
        )?;
        debug!(id = %id, "task settings upserted");
        Ok(())
    }

    async fn find_claimable(&self, id: &str, now: DateTime<Utc>) -> Result<Option<TaskRecord>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM tasks
                 WHERE id = ?1 AND current_run_ticket IS NULL AND next_run_start_at < ?2"
            ),
            rusqlite::params![id, format_ts(now)],
            row_to_record,
        ) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    #[instrument(skip_all, fields(id = %id, ticket = %ticket))]
    async fn claim(&self, id: &str, ticket: &str, now: DateTime<Utc>) -> Result<bool> {
        let db = self.db.lock().unwrap();
        // Re-checks the whole claimable predicate, not just the ticket: the
        // task may have been rescheduled between the read and this write.
        let n = db.execute(
            "UPDATE tasks SET current_run_ticket = ?1
             WHERE id = ?2 AND current_run_ticket IS NULL AND next_run_start_at < ?3",
            rusqlite::params![ticket, id, format_ts(now)],
        )?;
        Ok(n == 1)
    }

    #[instrument(skip_all, fields(id = %id))]
    async fn release(&self, id: &str, next_run_start_at: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE tasks SET current_run_ticket = NULL, next_run_start_at = ?1
             WHERE id = ?2",
            rusqlite::params![format_ts(next_run_start_at), id],
        )?;
        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<Option<TaskRecord>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM tasks WHERE id = ?1"),
            rusqlite::params![id],
            row_to_record,
        ) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    async fn list(&self) -> Result<Vec<TaskRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt =
            db.prepare(&format!("SELECT {RECORD_COLUMNS} FROM tasks ORDER BY id"))?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM tasks WHERE id = ?1", rusqlite::params![id])?;
        Ok(n > 0)
    }
}
