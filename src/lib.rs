//! Thread-serialized access to a single shared SQLite connection.
//!
//! A [`Database`] wraps one `rusqlite` connection behind a reentrant lock.
//! Every call takes the lock, so threads sharing the handle block on each
//! other instead of failing with "database is locked". With
//! [`Config::serialize_transactions`] (the default) a transaction keeps the
//! lock from the statement that opens it until its commit or rollback: the
//! owning thread continues unhindered while everyone else waits.
//!
//! ```no_run
//! use sqlite_gate::{Config, Database};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let db = Arc::new(Database::open("app.db", Config::shared())?);
//! db.execute("CREATE TABLE IF NOT EXISTS log(msg TEXT)", &[])?;
//!
//! let worker = {
//!     let db = Arc::clone(&db);
//!     std::thread::spawn(move || db.execute("INSERT INTO log VALUES (?)", &[json!("hi")]))
//! };
//! worker.join().unwrap()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Only threads of one process are coordinated. Acquisition waits without
//! bound; callers needing a timeout must impose it themselves.

pub mod config;
pub mod db;
mod error;
pub mod lock;
mod models;

use std::path::Path;

pub use config::Config;
pub use db::{Database, DatabaseGuard, TransactionMode};
pub use error::{Error, InvalidTransactionMode, LockError, Result};
pub use lock::ReentrantMutex;
pub use models::{QueryResult, Row};

/// Open `path` with the default configuration.
pub fn connect(path: impl AsRef<Path>) -> Result<Database> {
    Database::open(path, Config::default())
}

/// Version of the bundled SQLite library.
pub fn sqlite_version() -> &'static str {
    rusqlite::version()
}
