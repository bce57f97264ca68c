//! `tempo-worker` — the per-task control loop.
//!
//! A [`TaskWorker`] owns one task identifier's lifecycle end to end:
//! persisting its settings, polling the shared store for readiness, claiming
//! exclusive execution rights, running the work function, rescheduling, and
//! sleeping interruptibly between polls.
//!
//! # Lifecycle
//!
//! | call      | effect                                                     |
//! |-----------|------------------------------------------------------------|
//! | `start`   | validate + persist settings, spawn the control loop        |
//! | `stop`    | fire the cancel signal; the loop exits at its next check   |
//! | `join`    | await the spawned loop (stop never waits on its own)       |
//!
//! Multiple worker processes may run the same task id against one store; the
//! store's conditional ticket update guarantees at most one of them executes
//! a given eligible window.

pub mod cancel;
pub mod error;
pub mod settings;
pub mod worker;

pub use cancel::CancelSignal;
pub use error::{Result, SettingsError, WorkerError};
pub use settings::TaskSettings;
pub use worker::{TaskWorker, WorkFn, WorkFuture};
