//! Error types for sqlite-gate.

use std::thread::ThreadId;
use thiserror::Error;

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Misuse of the reentrant lock.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// Release issued without a matching acquire by the calling thread.
    #[error("release without matching acquire")]
    NotHeld,

    /// Release issued by a thread that does not own the lock.
    #[error("lock is owned by thread {owner:?}, not {current:?}")]
    NotOwner {
        /// Thread currently owning the lock.
        owner: ThreadId,
        /// Thread that attempted the release.
        current: ThreadId,
    },

    /// Unpin issued while no transaction pin is held.
    #[error("no transaction pin is held")]
    NotPinned,
}

/// A transaction mode name that is not `deferred`, `immediate` or `exclusive`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown transaction mode: {0:?}")]
pub struct InvalidTransactionMode(pub String);

/// Errors returned by [`Database`](crate::Database) operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Error reported by SQLite, passed through unchanged.
    #[error("SQLite Error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The lock was released or unpinned incorrectly.
    #[error("lock misuse: {0}")]
    Lock(#[from] LockError),

    /// The handle was used from a thread other than the one that opened it.
    #[error("database opened on thread {creator:?} used from thread {current:?}")]
    WrongThread {
        /// Thread that opened the database.
        creator: ThreadId,
        /// Thread that issued the call.
        current: ThreadId,
    },

    /// Commit or rollback issued by a thread that does not own the open transaction.
    #[error("transaction owned by thread {owner:?} cannot be finished from thread {current:?}")]
    NotTransactionOwner {
        /// Thread that started the transaction.
        owner: ThreadId,
        /// Thread that attempted to finish it.
        current: ThreadId,
    },

    /// A database call was made from inside a connection pass-through closure.
    #[error("database operation issued from inside a connection callback")]
    NestedOperation,

    /// The handle was closed while a transaction was still open.
    #[error("database closed with an open transaction owned by thread {owner:?}")]
    AbandonedTransaction {
        /// Thread that started the abandoned transaction.
        owner: ThreadId,
    },

    /// The handle is closed.
    #[error("database is closed")]
    Closed,

    /// Savepoint name is not a plain SQL identifier.
    #[error("invalid savepoint name: {0:?}")]
    InvalidSavepointName(String),
}

impl Error {
    /// Returns true for programming errors in how the handle is used,
    /// as opposed to errors coming from SQLite or from the handle's state.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Error::Lock(_)
                | Error::WrongThread { .. }
                | Error::NotTransactionOwner { .. }
                | Error::NestedOperation
        )
    }

    /// Returns the underlying SQLite error, if this error came from the engine.
    pub fn sqlite(&self) -> Option<&rusqlite::Error> {
        match self {
            Error::Sqlite(err) => Some(err),
            _ => None,
        }
    }
}
