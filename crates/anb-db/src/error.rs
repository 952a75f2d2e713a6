//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// Update targeted a record that does not exist.
    #[error("Video record not found: {0}")]
    NotFound(String),

    /// Update would move a processed record back out of `processed`.
    #[error("Video record already processed: {0}")]
    AlreadyProcessed(String),

    /// Insert collided with an existing record.
    #[error("Video record already exists: {0}")]
    Duplicate(String),

    /// A stored row could not be decoded.
    #[error("Corrupt video record {video_id}: {reason}")]
    Corrupt { video_id: String, reason: String },

    /// The blocking task running the query panicked or was cancelled.
    #[error("Database task failed: {0}")]
    Task(String),
}
