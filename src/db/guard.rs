//! Scoped acquisition of the database gate

use crate::db::Database;
use crate::error::Result;
use crate::lock::LockTicket;
use std::ops::Deref;

/// Holds the gate of a [`Database`] until dropped.
///
/// Other threads block on every call while the guard lives; the holding
/// thread keeps full access through the guard or the database itself.
#[must_use = "the gate is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct DatabaseGuard<'a> {
    db: &'a Database,
    _ticket: LockTicket<'a>,
}

impl Deref for DatabaseGuard<'_> {
    type Target = Database;

    fn deref(&self) -> &Database {
        self.db
    }
}

impl Database {
    /// Hold the gate across several calls.
    ///
    /// The gate is released exactly once when the guard is dropped, also when
    /// unwinding.
    pub fn hold(&self) -> Result<DatabaseGuard<'_>> {
        self.check_thread()?;
        Ok(DatabaseGuard {
            db: self,
            _ticket: self.gate().lock(),
        })
    }

    /// Acquire the gate without a guard. Pair every call with [`exit`](Self::exit).
    pub fn enter(&self) -> Result<()> {
        self.check_thread()?;
        self.gate().acquire();
        Ok(())
    }

    /// Release an acquisition made with [`enter`](Self::enter).
    ///
    /// Fails with a lock misuse error when the calling thread has no matching
    /// `enter`.
    pub fn exit(&self) -> Result<()> {
        self.check_thread()?;
        self.gate().release()?;
        Ok(())
    }
}
