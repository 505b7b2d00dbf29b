//! Params module - binds JSON parameters to SQLite statements

use rusqlite::types::Value as SqlValue;
use rusqlite::Statement;
use serde_json::Value;

/// Prefixes SQLite accepts in front of a named parameter.
const NAME_PREFIXES: [char; 3] = [':', '@', '$'];

/// Bind parameters to a prepared statement.
///
/// A single JSON object binds by name when the statement uses named
/// parameters (`:name`, `@name`, `$name`); anything else binds by position.
///
/// # Arguments
/// * `stmt` - Prepared statement to bind into
/// * `params` - Slice of JSON values representing the parameters
///
/// # Returns
/// An error when the count or the names do not match the statement
pub fn bind_params(stmt: &mut Statement<'_>, params: &[Value]) -> rusqlite::Result<()> {
    if let [Value::Object(map)] = params {
        if uses_named_params(stmt) {
            return bind_named(stmt, map);
        }
    }

    let expected = stmt.parameter_count();
    if params.len() != expected {
        return Err(rusqlite::Error::InvalidParameterCount(params.len(), expected));
    }
    for (i, value) in params.iter().enumerate() {
        stmt.raw_bind_parameter(i + 1, to_sql_value(value))?;
    }
    Ok(())
}

fn uses_named_params(stmt: &Statement<'_>) -> bool {
    stmt.parameter_count() > 0
        && stmt
            .parameter_name(1)
            .is_some_and(|name| name.starts_with(NAME_PREFIXES))
}

fn bind_named(
    stmt: &mut Statement<'_>,
    map: &serde_json::Map<String, Value>,
) -> rusqlite::Result<()> {
    let names: Vec<Option<String>> = (1..=stmt.parameter_count())
        .map(|i| stmt.parameter_name(i).map(str::to_string))
        .collect();

    for (i, name) in names.into_iter().enumerate() {
        let name = name.ok_or_else(|| rusqlite::Error::InvalidParameterName(format!("?{}", i + 1)))?;
        let key = name.trim_start_matches(NAME_PREFIXES);
        let value = map
            .get(key)
            .or_else(|| map.get(&name))
            .ok_or_else(|| rusqlite::Error::InvalidParameterName(name.clone()))?;
        stmt.raw_bind_parameter(i + 1, to_sql_value(value))?;
    }
    Ok(())
}

/// Convert a single JSON value to a SQLite value.
///
/// Arrays and objects are stored as their JSON text.
pub fn to_sql_value(v: &Value) -> SqlValue {
    match v {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(v.to_string()),
    }
}
