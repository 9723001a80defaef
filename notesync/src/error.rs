use thiserror::Error;

/// Remote API failures. "No record for this title" is distinguished from
/// transport trouble because the conflict policy treats it as an ordinary
/// absent-remote state, not an error.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("note not found on remote")]
    NotFound,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Local persistence failures. Losing a user edit is unacceptable, so these
/// surface synchronously from `save`/store calls instead of being retried.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("note title must not be empty")]
    EmptyTitle,
}

/// Errors reported on the engine's side channel. Note streams never carry
/// these; a remote outage degrades a synced view to local-only, it does not
/// terminate it.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("remote fetch for '{title}' failed: {detail}")]
    Fetch { title: String, detail: String },
    #[error("remote push for '{title}' failed: {detail}")]
    Push { title: String, detail: String },
    #[error("persisting remote update for '{title}' failed: {detail}")]
    Storage { title: String, detail: String },
}
