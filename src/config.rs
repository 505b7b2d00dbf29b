//! Configuration for opening a [`Database`](crate::Database).

use crate::db::TransactionMode;
use rusqlite::OpenFlags;

/// Options recognized when opening a database.
///
/// Engine settings (`open_flags`, `pragmas`) are handed to SQLite unmodified.
#[derive(Debug, Clone)]
pub struct Config {
    /// Hold the lock for the whole of a transaction, from the statement that
    /// opened it until its commit or rollback.
    ///
    /// When disabled, statements are serialized one at a time only, and other
    /// threads' statements may run inside a transaction started by another
    /// thread.
    pub serialize_transactions: bool,
    /// Allow threads other than the opening one to use the handle.
    pub allow_cross_thread_sharing: bool,
    /// Transaction opened implicitly before a data-modifying statement.
    /// `None` keeps SQLite's autocommit behavior.
    pub isolation: Option<TransactionMode>,
    /// Flags passed to `sqlite3_open_v2`.
    pub open_flags: OpenFlags,
    /// `PRAGMA name = value` pairs applied in order after opening.
    pub pragmas: Vec<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serialize_transactions: true,
            allow_cross_thread_sharing: false,
            isolation: None,
            open_flags: OpenFlags::default(),
            pragmas: Vec::new(),
        }
    }
}

impl Config {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for a handle shared by several threads.
    pub fn shared() -> Self {
        Self::default().allow_cross_thread_sharing(true)
    }

    /// Enable or disable transaction-wide locking.
    pub fn serialize_transactions(mut self, enabled: bool) -> Self {
        self.serialize_transactions = enabled;
        self
    }

    /// Allow or forbid use from threads other than the opening one.
    pub fn allow_cross_thread_sharing(mut self, allowed: bool) -> Self {
        self.allow_cross_thread_sharing = allowed;
        self
    }

    /// Set the implicit transaction mode.
    pub fn isolation(mut self, mode: Option<TransactionMode>) -> Self {
        self.isolation = mode;
        self
    }

    /// Set open flags.
    pub fn open_flags(mut self, flags: OpenFlags) -> Self {
        self.open_flags = flags;
        self
    }

    /// Append a pragma applied after opening.
    pub fn pragma(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.pragmas.push((name.into(), value.into()));
        self
    }
}
