use std::env;
use std::time::Duration;

/// Environment variable names - single source of truth
pub mod env_vars {
    pub const BASE_URL: &str = "NOTESYNC_BASE_URL";
    pub const DB_PATH: &str = "NOTESYNC_DB_PATH";
    pub const POLL_INTERVAL_MS: &str = "NOTESYNC_POLL_INTERVAL_MS";
}

/// Default values
pub mod defaults {
    pub const BASE_URL: &str = "https://sharednotes.goto.ucsd.edu";
    pub const DB_PATH: &str = "./.db/notes.db";
    pub const POLL_INTERVAL_MS: u64 = 3000;
}

/// Runtime configuration for assembling a [`crate::SyncEngine`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the shared notes service.
    pub base_url: String,
    /// Path to the local SQLite database file.
    pub db_path: String,
    /// How often each active title is polled for remote changes.
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::BASE_URL.to_string(),
            db_path: defaults::DB_PATH.to_string(),
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
        }
    }
}

impl SyncConfig {
    /// Build a config from environment variables, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        let base_url =
            env::var(env_vars::BASE_URL).unwrap_or_else(|_| defaults::BASE_URL.to_string());
        let db_path =
            env::var(env_vars::DB_PATH).unwrap_or_else(|_| defaults::DB_PATH.to_string());
        let poll_interval_ms = env::var(env_vars::POLL_INTERVAL_MS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::POLL_INTERVAL_MS);

        Self {
            base_url,
            db_path,
            poll_interval: Duration::from_millis(poll_interval_ms),
        }
    }
}
