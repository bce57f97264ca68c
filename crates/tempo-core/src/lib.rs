//! `tempo-core` — shared configuration and constants for the Tempo workspace.

pub mod config;
pub mod error;

pub use config::{DatabaseConfig, TempoConfig, POLL_INTERVAL_SECS};
pub use error::{Result, TempoError};
