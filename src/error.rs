//! Error types for the chore ledger.

/// Top-level error type for ledger, scheduler and notification operations.
#[derive(Debug, thiserror::Error)]
pub enum ChoreError {
    /// A referenced user, chore or daily instance does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violation or a transition blocked by another user's state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Rejected input (non-positive points, malformed date or time).
    #[error("validation error: {0}")]
    Validation(String),

    /// SQLite transport or transaction failure.
    #[error("storage error: {0}")]
    Storage(#[source] rusqlite::Error),

    /// Notifier dispatch failure. Never fatal to a scheduled cycle.
    #[error("notification error: {0}")]
    Notification(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Scheduler error (trigger setup, run ledger).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Store mutex poisoned by a panicking writer.
    #[error("lock poisoned: {0}")]
    Lock(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for ChoreError {
    fn from(e: rusqlite::Error) -> Self {
        if is_unique_violation(&e) {
            Self::Conflict(e.to_string())
        } else {
            Self::Storage(e)
        }
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ChoreError>;
