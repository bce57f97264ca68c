use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Fixed delay between successive readiness polls by a worker instance.
///
/// Deliberately a constant, not configuration: every deployment sharing a
/// store must poll at the same cadence so claim contention stays predictable.
pub const POLL_INTERVAL_SECS: u64 = 5;

/// Top-level config (tempo.toml + TEMPO_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempoConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Location of the shared task store.
///
/// Every worker process that should coordinate on the same tasks must point
/// at the same file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    /// Override with env var: TEMPO_DATABASE_PATH=/var/lib/tempo/tempo.db
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tempo/tempo.db", home)
}

impl TempoConfig {
    /// Load config from a TOML file with TEMPO_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.tempo/tempo.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: TempoConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("TEMPO_").split("_"))
            .extract()
            .map_err(|e| crate::error::TempoError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tempo/tempo.toml", home)
}
