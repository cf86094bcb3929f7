//! Errors raised by checkpoint and run-history storage.

/// Failure modes of a [`StateBackend`](crate::StateBackend) operation.
///
/// Checkpoint reads and writes sit on the chunk commit path, so the chunk
/// driver treats every variant here as an infrastructure failure rather
/// than an item error.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The underlying `SQLite` store rejected a checkpoint or run query.
    #[error("state store query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The state database file or its parent directory could not be prepared.
    #[error("state database i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// A thread panicked while holding the store connection.
    #[error("state store connection lock poisoned")]
    LockPoisoned,

    /// A run row carries a status string this engine never writes.
    #[error("run {run_id} has unrecognized status '{status}'")]
    UnknownStatus { run_id: i64, status: String },
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;
