//! Row module - utilities for converting SQLite rows to JSON values

use crate::models::Row;
use rusqlite::types::ValueRef;
use serde_json::{Number, Value};

/// Convert one SQLite column to a JSON value.
///
/// Blobs are rendered as standard base64 strings.
pub fn sqlite_to_json(row: &rusqlite::Row<'_>, i: usize) -> rusqlite::Result<Value> {
    Ok(match row.get_ref(i)? {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            b,
        )),
    })
}

/// Materialize all columns of a row.
pub fn materialize(row: &rusqlite::Row<'_>, column_count: usize) -> rusqlite::Result<Row> {
    (0..column_count).map(|i| sqlite_to_json(row, i)).collect()
}
