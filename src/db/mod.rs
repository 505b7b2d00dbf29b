//! Database module - serialized access to a shared SQLite connection

mod database;
mod guard;
mod params;
mod row;
mod statement;
mod transaction;

pub use database::{Database, DEFAULT_FETCH_MANY_SIZE, MEMORY_PATH};
pub use guard::DatabaseGuard;
pub use params::{bind_params, to_sql_value};
pub use row::sqlite_to_json;
pub use transaction::TransactionMode;
