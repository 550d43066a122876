//! Store error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::worker::JobStatus;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Another worker claimed the job first.
    #[error("Job '{job_id}' was claimed by another worker")]
    ClaimConflict { job_id: String },

    /// A compare-and-set lost: the job is no longer in `expected`.
    #[error("Job '{job_id}' is no longer {expected}")]
    Conflict { job_id: String, expected: JobStatus },

    #[error("Invalid job transition to {to}")]
    InvalidTransition { to: JobStatus },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP {status} from {url}: {body}")]
    UnexpectedStatus { status: u16, url: String, body: String },

    #[error("Failed to decode stored record: {0}")]
    Decode(String),

    #[error("Unsupported URL '{0}'")]
    UnsupportedUrl(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// True for errors that mean "someone else owns this job now".
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::ClaimConflict { .. } | StoreError::Conflict { .. }
        )
    }

    /// True for failures worth retrying: network trouble, a busy database,
    /// or a server-side HTTP status.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            StoreError::UnexpectedStatus { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            StoreError::Task(_) => true,
            _ => false,
        }
    }
}
