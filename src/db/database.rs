//! Database module - the shared handle and its operation gate

use crate::config::Config;
use crate::db::statement::{self, ResultSet};
use crate::db::transaction::{self, Session};
use crate::error::{Error, Result};
use crate::lock::{LockTicket, ReentrantMutex};
use crate::models::{QueryResult, Row};
use parking_lot::Mutex;
use rusqlite::{Connection, InterruptHandle};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};
use tracing::{debug, warn};

/// Default number of rows returned by [`Database::fetch_many`].
pub const DEFAULT_FETCH_MANY_SIZE: usize = 1000;

/// Path under which SQLite opens a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

/// State only touched while the gate is held.
#[derive(Debug)]
struct Engine {
    conn: Option<Connection>,
    cursor: ResultSet,
    session: Option<Session>,
}

impl Engine {
    fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(Error::Closed)
    }
}

/// A SQLite connection shared by several threads.
///
/// Every call is serialized through one reentrant lock, so at most one
/// operation runs against SQLite at any instant and concurrent callers block
/// instead of seeing `SQLITE_BUSY`. With
/// [`serialize_transactions`](Config::serialize_transactions) enabled, a
/// thread that opens a transaction keeps the lock until it commits or rolls
/// back; its own calls pass straight through while other threads wait.
///
/// Share the handle with `Arc<Database>` after opening it with
/// [`Config::allow_cross_thread_sharing`].
pub struct Database {
    path: String,
    config: Config,
    creator: ThreadId,
    gate: ReentrantMutex,
    engine: Mutex<Engine>,
    interrupt: InterruptHandle,
    closed: AtomicBool,
}

impl Database {
    /// Open the database at `path`. `":memory:"` opens a private in-memory database.
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let path = path.as_ref();
        let conn = if path.as_os_str() == MEMORY_PATH {
            Connection::open_in_memory_with_flags(config.open_flags)?
        } else {
            Connection::open_with_flags(path, config.open_flags)?
        };
        Self::from_connection(conn, path.to_string_lossy().into_owned(), config)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory(config: Config) -> Result<Self> {
        let conn = Connection::open_in_memory_with_flags(config.open_flags)?;
        Self::from_connection(conn, MEMORY_PATH.to_string(), config)
    }

    fn from_connection(conn: Connection, path: String, config: Config) -> Result<Self> {
        for (name, value) in &config.pragmas {
            conn.pragma_update(None, name.as_str(), value.as_str())?;
        }

        debug!(
            %path,
            serialize_transactions = config.serialize_transactions,
            allow_cross_thread_sharing = config.allow_cross_thread_sharing,
            "opened database"
        );

        Ok(Database {
            interrupt: conn.get_interrupt_handle(),
            path,
            config,
            creator: thread::current().id(),
            gate: ReentrantMutex::new(),
            engine: Mutex::new(Engine {
                conn: Some(conn),
                cursor: ResultSet::default(),
                session: None,
            }),
            closed: AtomicBool::new(false),
        })
    }

    /// Path the database was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Configuration the database was opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns true once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns true while any thread holds the gate, through an in-flight
    /// call, a scoped hold or an open transaction.
    pub fn is_locked(&self) -> bool {
        self.gate.is_locked()
    }

    pub(crate) fn gate(&self) -> &ReentrantMutex {
        &self.gate
    }

    pub(crate) fn check_thread(&self) -> Result<()> {
        if self.config.allow_cross_thread_sharing {
            return Ok(());
        }
        let current = thread::current().id();
        if current == self.creator {
            Ok(())
        } else {
            Err(Error::WrongThread {
                creator: self.creator,
                current,
            })
        }
    }

    /// Run `f` against the engine with the gate held, then reconcile the
    /// transaction session. The gate is released on every exit path.
    fn operate<T>(&self, f: impl FnOnce(&mut Engine) -> Result<T>) -> Result<T> {
        self.check_thread()?;
        let _ticket = self.gate.lock();
        // Only fails when this thread is already inside a pass-through callback.
        let mut engine = self.engine.try_lock().ok_or(Error::NestedOperation)?;
        if engine.conn.is_none() {
            return Err(Error::Closed);
        }

        let result = f(&mut *engine);

        let Engine { conn, session, .. } = &mut *engine;
        if let Some(conn) = conn.as_ref() {
            transaction::track(
                &self.gate,
                session,
                conn,
                self.config.serialize_transactions,
            )?;
        }
        result
    }

    /// Execute one statement, buffering any rows it returns for the fetch calls.
    ///
    /// Parameters bind by position, or by name when a single JSON object is
    /// passed to a statement using named parameters.
    ///
    /// # Arguments
    /// * `sql` - The statement to run
    /// * `params` - Slice of JSON values representing the parameters
    ///
    /// # Returns
    /// Rows changed and the last inserted rowid
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.operate(|engine| {
            engine.cursor.clear();
            let conn = engine.conn()?;
            self.implicit_begin(conn, sql)?;

            let (rows, changes) = statement::run(conn, sql, params)?;
            let result = QueryResult {
                changes,
                last_insert_rowid: conn.last_insert_rowid(),
            };
            engine.cursor = rows;
            Ok(result)
        })
    }

    /// Execute one statement once per parameter set.
    ///
    /// # Arguments
    /// * `sql` - The statement to run, prepared once
    /// * `param_sets` - One parameter list per execution
    ///
    /// # Returns
    /// Rows changed summed over all executions, and the last inserted rowid
    pub fn execute_many(&self, sql: &str, param_sets: &[Vec<Value>]) -> Result<QueryResult> {
        self.operate(|engine| {
            engine.cursor.clear();
            let conn = engine.conn()?;
            self.implicit_begin(conn, sql)?;

            let changes = statement::run_many(conn, sql, param_sets)?;
            Ok(QueryResult {
                changes,
                last_insert_rowid: conn.last_insert_rowid(),
            })
        })
    }

    /// Execute a batch of semicolon-separated statements without parameters.
    pub fn execute_script(&self, sql: &str) -> Result<()> {
        self.operate(|engine| {
            engine.cursor.clear();
            engine.conn()?.execute_batch(sql)?;
            Ok(())
        })
    }

    fn implicit_begin(&self, conn: &Connection, sql: &str) -> Result<()> {
        if let Some(mode) = self.config.isolation {
            if conn.is_autocommit() && transaction::is_dml(sql) {
                conn.execute_batch(&mode.begin_sql())?;
            }
        }
        Ok(())
    }

    /// Take the next buffered row of the last statement.
    pub fn fetch_one(&self) -> Result<Option<Row>> {
        self.operate(|engine| Ok(engine.cursor.rows.pop_front()))
    }

    /// Take up to `size` buffered rows.
    ///
    /// # Arguments
    /// * `size` - Maximum number of rows, usually [`DEFAULT_FETCH_MANY_SIZE`]
    ///
    /// # Returns
    /// The rows taken, fewer than `size` once the buffer runs out
    pub fn fetch_many(&self, size: usize) -> Result<Vec<Row>> {
        self.operate(|engine| Ok(engine.cursor.take(size)))
    }

    /// Take all remaining buffered rows.
    pub fn fetch_all(&self) -> Result<Vec<Row>> {
        self.operate(|engine| Ok(engine.cursor.take(usize::MAX)))
    }

    /// Column names of the last statement that returned rows.
    pub fn columns(&self) -> Result<Vec<String>> {
        self.operate(|engine| Ok(engine.cursor.columns.clone()))
    }

    /// Commit the open transaction. Does nothing outside a transaction.
    pub fn commit(&self) -> Result<()> {
        self.finish("COMMIT")
    }

    /// Roll back the open transaction. Does nothing outside a transaction.
    pub fn rollback(&self) -> Result<()> {
        self.finish("ROLLBACK")
    }

    fn finish(&self, sql: &str) -> Result<()> {
        self.operate(|engine| {
            transaction::check_owner(engine.session.as_ref())?;
            let conn = engine.conn()?;
            if !conn.is_autocommit() {
                conn.execute_batch(sql)?;
            }
            Ok(())
        })
    }

    /// Returns true while SQLite reports an open transaction.
    pub fn in_transaction(&self) -> Result<bool> {
        self.operate(|engine| Ok(!engine.conn()?.is_autocommit()))
    }

    /// Run `f` with direct access to the connection, under the gate.
    ///
    /// Use this for engine features without a dedicated method: functions,
    /// collations, extensions, pragmas. Calling back into the `Database`
    /// from inside `f` fails with [`Error::NestedOperation`].
    pub fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        self.operate(|engine| Ok(f(engine.conn()?)?))
    }

    /// Interrupt the statement currently running, from any thread.
    ///
    /// This call bypasses the gate; it is a no-op once the database is closed.
    pub fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    /// Close the connection.
    ///
    /// Waits for operations in flight on other threads. Closing an
    /// already-closed database does nothing.
    ///
    /// A transaction still open is rolled back by SQLite, its hold on the
    /// gate is dropped, and [`Error::AbandonedTransaction`] is returned. When
    /// the transaction belongs to another thread that is idle, the gate is
    /// taken over from it rather than waited for.
    pub fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.check_thread()?;
        self.close_inner()
    }

    fn close_inner(&self) -> Result<()> {
        let reclaimed = self.gate.acquire_or_reclaim();
        let _ticket = LockTicket::adopt(&self.gate);
        let mut engine = self.engine.try_lock().ok_or(Error::NestedOperation)?;

        let Some(conn) = engine.conn.take() else {
            return Ok(());
        };
        self.closed.store(true, Ordering::Release);
        engine.cursor.clear();

        let abandoned = engine.session.take();
        if let Some(session) = &abandoned {
            warn!(owner = ?session.owner, path = %self.path, "closing database with an open transaction");
            // A reclaim already discarded the previous owner's pin.
            if session.pinned && reclaimed.is_none() {
                self.gate.unpin()?;
            }
        }

        conn.close().map_err(|(_, err)| err)?;
        debug!(path = %self.path, "closed database");

        match abandoned {
            Some(session) => Err(Error::AbandonedTransaction {
                owner: session.owner,
            }),
            None => Ok(()),
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Err(err) = self.close_inner() {
            warn!(%err, path = %self.path, "error while closing dropped database");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
