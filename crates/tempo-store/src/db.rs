use rusqlite::Connection;

use crate::error::Result;

/// Initialise the tasks table and its index.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tasks (
            id                  TEXT NOT NULL PRIMARY KEY,
            settings_json       TEXT NOT NULL,   -- opaque, owned by the worker layer
            next_run_start_at   TEXT NOT NULL,   -- fixed-width UTC, see format_ts
            current_run_ticket  TEXT             -- NULL while unclaimed
        ) STRICT;

        -- Efficient readiness polling: WHERE next_run_start_at < ?
        CREATE INDEX IF NOT EXISTS idx_tasks_next_run
            ON tasks(next_run_start_at);",
    )?;
    Ok(())
}
