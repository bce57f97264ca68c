use thiserror::Error;

/// Errors that can occur during task store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Filesystem-level failure while opening the store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The store could not be reached.
    ///
    /// `SqliteTaskStore` never produces this; it exists for network-backed
    /// implementations of the port and for test doubles simulating outages.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
