use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

use crate::error::DbError;
use crate::types::{FromValue, Value, ValueKind};

/// One result column as described at compile time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name (alias when one is given).
    pub name: String,
    /// Declared type from the table schema, if the column maps to one.
    pub decl_type: Option<String>,
    /// Affinity derived from the declared type.
    pub kind: ValueKind,
}

/// Ordered column layout shared by every row a statement produces.
///
/// Built once when a statement is compiled and reused for all executions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowDescriptor {
    columns: Vec<ColumnInfo>,
    index: HashMap<String, usize>,
}

impl RowDescriptor {
    #[must_use]
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        let mut index = HashMap::with_capacity(columns.len());
        // First occurrence wins for duplicate names (e.g. joins selecting `id` twice).
        for (i, col) in columns.iter().enumerate() {
            index.entry(col.name.clone()).or_insert(i);
        }
        Self { columns, index }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

/// A row from a query result.
///
/// Holds the statement's shared descriptor plus the decoded values.
#[derive(Debug, Clone)]
pub struct Row {
    descriptor: Arc<RowDescriptor>,
    values: Vec<Value>,
}

impl Row {
    /// # Errors
    /// Returns `DbError::RowDecodeError` if the value count does not match the descriptor.
    pub fn new(descriptor: Arc<RowDescriptor>, values: Vec<Value>) -> Result<Self, DbError> {
        if descriptor.len() != values.len() {
            return Err(DbError::RowDecodeError(format!(
                "row has {} values but the statement describes {} columns",
                values.len(),
                descriptor.len()
            )));
        }
        Ok(Self { descriptor, values })
    }

    #[must_use]
    pub fn descriptor(&self) -> &RowDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value from the row by column name.
    #[must_use]
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.descriptor
            .index_of(column)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value from the row by column index.
    #[must_use]
    pub fn value_at(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Typed access by column name.
    ///
    /// # Errors
    /// Returns `DbError::RowDecodeError` for unknown columns or mismatched types.
    pub fn get<T: FromValue>(&self, column: &str) -> Result<T, DbError> {
        let value = self
            .value(column)
            .ok_or_else(|| DbError::RowDecodeError(format!("no column named {column}")))?;
        T::from_value(value).map_err(|e| match e {
            DbError::RowDecodeError(msg) => DbError::RowDecodeError(format!("{column}: {msg}")),
            other => other,
        })
    }

    /// Typed access by column index.
    ///
    /// # Errors
    /// Returns `DbError::RowDecodeError` for out-of-range indexes or mismatched types.
    pub fn get_at<T: FromValue>(&self, index: usize) -> Result<T, DbError> {
        let value = self.values.get(index).ok_or_else(|| {
            DbError::RowDecodeError(format!(
                "column index {index} out of range ({} columns)",
                self.values.len()
            ))
        })?;
        T::from_value(value)
    }

    /// Project the row into a JSON object keyed by column name.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::with_capacity(self.values.len());
        for (col, value) in self.descriptor.columns().iter().zip(&self.values) {
            // Later duplicates overwrite earlier ones, as in a plain key/value row.
            map.insert(col.name.clone(), value.to_json());
        }
        JsonValue::Object(map)
    }
}

/// Outcome of a mutating statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    /// Rows inserted, updated or deleted by this statement.
    pub changes: u64,
    /// Rowid of the most recent successful INSERT on the connection.
    pub last_insert_rowid: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> Arc<RowDescriptor> {
        Arc::new(RowDescriptor::new(vec![
            ColumnInfo {
                name: "id".into(),
                decl_type: Some("INTEGER".into()),
                kind: ValueKind::Integer,
            },
            ColumnInfo {
                name: "name".into(),
                decl_type: Some("TEXT".into()),
                kind: ValueKind::Text,
            },
        ]))
    }

    #[test]
    fn row_lookup_by_name_and_index() -> Result<(), DbError> {
        let row = Row::new(descriptor(), vec![Value::Integer(4), Value::Text("Ana".into())])?;
        assert_eq!(row.get::<i64>("id")?, 4);
        assert_eq!(row.get_at::<String>(1)?, "Ana");
        assert!(row.value("missing").is_none());
        assert!(matches!(row.get::<i64>("name"), Err(DbError::RowDecodeError(_))));
        Ok(())
    }

    #[test]
    fn row_rejects_wrong_arity() {
        let err = Row::new(descriptor(), vec![Value::Null]).unwrap_err();
        assert!(matches!(err, DbError::RowDecodeError(_)));
    }

    #[test]
    fn row_projects_to_json_object() -> Result<(), DbError> {
        let row = Row::new(descriptor(), vec![Value::Integer(1), Value::Null])?;
        assert_eq!(row.to_json(), serde_json::json!({"id": 1, "name": null}));
        Ok(())
    }

    #[test]
    fn run_result_serializes_camel_case() {
        let res = RunResult {
            changes: 2,
            last_insert_rowid: 9,
        };
        assert_eq!(
            serde_json::to_value(res).unwrap(),
            serde_json::json!({"changes": 2, "lastInsertRowid": 9})
        );
    }
}
