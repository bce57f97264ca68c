use thiserror::Error;

use tempo_store::StoreError;

/// Errors surfaced to the caller of [`crate::TaskWorker::start`].
///
/// These are the only failures a caller ever observes; everything that goes
/// wrong after the control loop has been spawned is logged, not raised.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The provided settings failed schema validation. The loop was never
    /// entered.
    #[error("invalid task settings: {0}")]
    InvalidSettings(#[from] SettingsError),

    /// The task record could not be persisted. The loop was never entered.
    #[error("failed to persist task '{id}': {source}")]
    Persistence {
        id: String,
        #[source]
        source: StoreError,
    },
}

/// Ways a settings payload can fail parsing or validation.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Not a known settings shape: wrong version tag, missing fields, or not
    /// an object at all. During polling this is read as "superseded by a
    /// newer definition".
    #[error("unrecognised settings payload: {0}")]
    Unrecognised(#[from] serde_json::Error),

    /// A duration field is not valid ISO-8601.
    #[error("invalid duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    /// A task that never waits between runs is a configuration mistake.
    #[error("cadence must be strictly positive")]
    NonPositiveCadence,
}

pub type Result<T> = std::result::Result<T, WorkerError>;
