use std::sync::Arc;

use rusqlite::Statement;
use rusqlite::types::ValueRef;

use crate::error::DbError;
use crate::results::{ColumnInfo, Row, RowDescriptor};
use crate::types::{MAX_SAFE_INTEGER, MIN_SAFE_INTEGER, Value, ValueKind};

/// Describe the result columns of a freshly compiled statement.
pub(crate) fn describe_columns(stmt: &Statement<'_>) -> RowDescriptor {
    let columns = stmt
        .columns()
        .into_iter()
        .map(|col| {
            let decl_type = col.decl_type().map(str::to_owned);
            ColumnInfo {
                name: col.name().to_owned(),
                kind: ValueKind::from_decl_type(decl_type.as_deref()),
                decl_type,
            }
        })
        .collect();
    RowDescriptor::new(columns)
}

/// Apply the integer decoding policy.
///
/// With `safe_integers` the full 64-bit value is returned; otherwise values a
/// double cannot hold exactly are rejected instead of being truncated.
pub(crate) fn decode_integer(value: i64, safe_integers: bool) -> Result<i64, DbError> {
    if safe_integers || (MIN_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&value) {
        Ok(value)
    } else {
        Err(DbError::IntegerOverflowError { value })
    }
}

/// Extract a `Value` from a `SQLite` row.
///
/// # Errors
///
/// Returns `DbError` if the value cannot be converted.
pub(crate) fn extract_value(
    row: &rusqlite::Row<'_>,
    idx: usize,
    safe_integers: bool,
) -> Result<Value, DbError> {
    match row.get_ref(idx)? {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(i) => decode_integer(i, safe_integers).map(Value::Integer),
        ValueRef::Real(f) => Ok(Value::Real(f)),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|s| Value::Text(s.to_owned()))
            .map_err(|e| DbError::RowDecodeError(format!("column {idx}: invalid UTF-8 text: {e}"))),
        ValueRef::Blob(bytes) => Ok(Value::Blob(bytes.to_vec())),
    }
}

/// True when `descriptor` still has the live statement's column list.
pub(crate) fn descriptor_matches(descriptor: &RowDescriptor, stmt: &Statement<'_>) -> bool {
    descriptor.len() == stmt.column_count()
        && descriptor
            .columns()
            .iter()
            .zip(stmt.column_names())
            .all(|(column, name)| column.name == name)
}

/// Decode one engine row against the statement's descriptor.
///
/// The engine re-prepares a statement transparently after a schema change, so
/// a descriptor whose columns no longer match is rebuilt from the live statement.
pub(crate) fn build_row(
    row: &rusqlite::Row<'_>,
    descriptor: &mut Arc<RowDescriptor>,
    safe_integers: bool,
) -> Result<Row, DbError> {
    let stmt: &Statement<'_> = row.as_ref();
    if !descriptor_matches(descriptor, stmt) {
        *descriptor = Arc::new(describe_columns(stmt));
    }
    let mut values = Vec::with_capacity(descriptor.len());
    for idx in 0..descriptor.len() {
        values.push(extract_value(row, idx, safe_integers)?);
    }
    Row::new(Arc::clone(descriptor), values)
}
