//! `tempo-store` — the shared task record store.
//!
//! Task records live in a single SQLite `tasks` table shared by every worker
//! process. The store is the only coordination medium between processes:
//! exclusive execution rights are taken with a conditional `UPDATE` that sets
//! `current_run_ticket` only while the row is still eligible and unclaimed,
//! which gives compare-and-swap semantics without a separate lock service.
//!
//! | column             | meaning                                            |
//! |--------------------|----------------------------------------------------|
//! | `id`               | logical task identifier (primary key)              |
//! | `settings_json`    | serialized settings, opaque at this layer          |
//! | `next_run_start_at`| task is eligible once the clock passes this        |
//! | `current_run_ticket` | non-NULL while some worker is executing the task |

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::{SqliteTaskStore, TaskStore};
pub use types::{format_ts, TaskRecord};
