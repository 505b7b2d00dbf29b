//! Transaction module - tracks the transaction session and pins the lock to it

use crate::db::Database;
use crate::error::{Error, InvalidTransactionMode, Result};
use crate::lock::ReentrantMutex;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::Connection;
use std::fmt;
use std::str::FromStr;
use std::thread::{self, ThreadId};
use std::time::Instant;
use tracing::{debug, warn};

/// Statements before which an implicit transaction is opened.
static DML_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(INSERT|UPDATE|DELETE|REPLACE)\b").unwrap());

/// Savepoint names are formatted into SQL, so only plain identifiers pass.
static SAVEPOINT_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// How `BEGIN` acquires SQLite's own locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionMode {
    #[default]
    Deferred,
    Immediate,
    Exclusive,
}

impl TransactionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionMode::Deferred => "DEFERRED",
            TransactionMode::Immediate => "IMMEDIATE",
            TransactionMode::Exclusive => "EXCLUSIVE",
        }
    }

    pub(crate) fn begin_sql(&self) -> String {
        format!("BEGIN {}", self.as_str())
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionMode {
    type Err = InvalidTransactionMode;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deferred" => Ok(TransactionMode::Deferred),
            "immediate" => Ok(TransactionMode::Immediate),
            "exclusive" => Ok(TransactionMode::Exclusive),
            _ => Err(InvalidTransactionMode(s.to_string())),
        }
    }
}

/// An open transaction and the thread that started it.
#[derive(Debug)]
pub(crate) struct Session {
    pub owner: ThreadId,
    /// Whether the session holds a pin on the lock.
    pub pinned: bool,
    started: Instant,
}

/// Reconcile the session with SQLite's autocommit state after an operation.
///
/// A transaction that appeared starts a session owned by the calling thread,
/// pinning the lock when `serialize` is set. A transaction that disappeared
/// ends the session and gives its pin back.
pub(crate) fn track(
    lock: &ReentrantMutex,
    session: &mut Option<Session>,
    conn: &Connection,
    serialize: bool,
) -> Result<()> {
    let in_transaction = !conn.is_autocommit();

    match (session.as_ref(), in_transaction) {
        (None, true) => {
            if serialize {
                lock.pin()?;
            }
            let owner = thread::current().id();
            debug!(?owner, pinned = serialize, "transaction session started");
            *session = Some(Session {
                owner,
                pinned: serialize,
                started: Instant::now(),
            });
        }
        (Some(_), false) => {
            if let Some(ended) = session.take() {
                let current = thread::current().id();
                if ended.owner != current {
                    warn!(owner = ?ended.owner, ?current, "transaction ended by a thread that did not start it");
                }
                debug!(elapsed = ?ended.started.elapsed(), "transaction session ended");
                if ended.pinned {
                    lock.unpin()?;
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Fail unless the calling thread may finish the open session.
pub(crate) fn check_owner(session: Option<&Session>) -> Result<()> {
    let current = thread::current().id();
    match session {
        Some(s) if s.owner != current => Err(Error::NotTransactionOwner {
            owner: s.owner,
            current,
        }),
        _ => Ok(()),
    }
}

pub(crate) fn is_dml(sql: &str) -> bool {
    DML_REGEX.is_match(sql)
}

fn check_savepoint_name(name: &str) -> Result<()> {
    if SAVEPOINT_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidSavepointName(name.to_string()))
    }
}

/// Rolls back a transaction body that did not commit, including on unwind.
struct PendingTransaction<'a> {
    db: &'a Database,
    done: bool,
}

impl Drop for PendingTransaction<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if thread::panicking() {
            warn!("transaction body panicked, rolling back");
        }
        if let Err(rollback_err) = self.db.rollback() {
            warn!(%rollback_err, "rollback of unfinished transaction failed");
        }
    }
}

impl Database {
    /// Begin a transaction with the given mode.
    pub fn begin(&self, mode: TransactionMode) -> Result<()> {
        self.execute_script(&mode.begin_sql())
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok`. Rolls back when `f` returns `Err`,
    /// when `f` panics, and when the commit itself fails. The lock is held
    /// for the whole call, so the statements of `f` never interleave with
    /// other threads even when transaction serialization is disabled.
    ///
    /// # Arguments
    /// * `mode` - How `BEGIN` acquires SQLite's locks
    /// * `f` - Body run against this database inside the transaction
    ///
    /// # Returns
    /// The value returned by `f`, or the first error of the body or the commit
    pub fn transaction<T, F>(&self, mode: TransactionMode, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T>,
    {
        let _scope = self.hold()?;
        self.begin(mode)?;
        // Declared after the hold so it rolls back before the hold is released.
        let mut pending = PendingTransaction { db: self, done: false };

        let result = f(self).and_then(|value| {
            self.commit()?;
            Ok(value)
        });
        if result.is_ok() {
            pending.done = true;
        }
        result
    }

    /// Create a savepoint, starting a transaction if none is open.
    pub fn savepoint(&self, name: &str) -> Result<()> {
        check_savepoint_name(name)?;
        self.execute_script(&format!("SAVEPOINT {}", name))
    }

    /// Release a savepoint, committing if it is the outermost one.
    pub fn release_savepoint(&self, name: &str) -> Result<()> {
        check_savepoint_name(name)?;
        self.execute_script(&format!("RELEASE SAVEPOINT {}", name))
    }

    /// Roll back to a savepoint, keeping the savepoint open.
    pub fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        check_savepoint_name(name)?;
        self.execute_script(&format!("ROLLBACK TO SAVEPOINT {}", name))
    }
}
