//! Statement module - runs single statements and buffers their rows

use crate::db::params::bind_params;
use crate::db::row::materialize;
use crate::models::Row;
use rusqlite::Connection;
use serde_json::Value;
use std::collections::VecDeque;

/// Rows produced by the last executed statement, consumed by the fetch calls.
#[derive(Debug, Default)]
pub(crate) struct ResultSet {
    pub columns: Vec<String>,
    pub rows: VecDeque<Row>,
}

impl ResultSet {
    pub fn clear(&mut self) {
        self.columns.clear();
        self.rows.clear();
    }

    pub fn take(&mut self, n: usize) -> Vec<Row> {
        let n = n.min(self.rows.len());
        self.rows.drain(..n).collect()
    }
}

/// Prepare, bind and run one statement.
///
/// Returns the buffered rows and the number of changed rows (0 when the
/// statement produces rows).
pub(crate) fn run(
    conn: &Connection,
    sql: &str,
    params: &[Value],
) -> rusqlite::Result<(ResultSet, u64)> {
    let mut stmt = conn.prepare_cached(sql)?;
    bind_params(&mut stmt, params)?;

    let column_count = stmt.column_count();
    if column_count == 0 {
        let changes = stmt.raw_execute()?;
        return Ok((ResultSet::default(), changes as u64));
    }

    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let mut rows = stmt.raw_query();
    let mut buffered = VecDeque::new();
    while let Some(row) = rows.next()? {
        buffered.push_back(materialize(row, column_count)?);
    }

    Ok((
        ResultSet {
            columns,
            rows: buffered,
        },
        0,
    ))
}

/// Run one statement once per parameter set and return the summed changes.
pub(crate) fn run_many(
    conn: &Connection,
    sql: &str,
    param_sets: &[Vec<Value>],
) -> rusqlite::Result<u64> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut changes = 0u64;
    for params in param_sets {
        bind_params(&mut stmt, params)?;
        changes += stmt.raw_execute()? as u64;
    }
    Ok(changes)
}
