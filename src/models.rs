use serde::{Deserialize, Serialize};

/// One materialized result row, columns in statement order.
pub type Row = Vec<serde_json::Value>;

/// Outcome of a statement execution.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryResult {
    /// Rows modified by the statement; 0 for statements returning rows.
    pub changes: u64,
    /// Rowid of the most recent successful insert on the connection.
    pub last_insert_rowid: i64,
}
