use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;

use crate::error::DbError;

/// Largest integer a double can hold exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;
/// Smallest integer a double can hold exactly.
pub const MIN_SAFE_INTEGER: i64 = -MAX_SAFE_INTEGER;

/// A single stored value, tagged by `SQLite` storage class.
///
/// Used both for bound parameters and for decoded row values:
/// ```rust
/// use decopres_db::prelude::*;
///
/// let params = vec![
///     Value::from(1_i64),
///     Value::from("alice"),
///     Value::from(true),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value
    Null,
    /// Integer value (64-bit)
    Integer(i64),
    /// Floating point value (64-bit)
    Real(f64),
    /// Text/string value
    Text(String),
    /// Binary data
    Blob(Vec<u8>),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        if let Value::Integer(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Real(value) => Some(*value),
            #[allow(clippy::cast_precision_loss)]
            Value::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let Value::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let Value::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self.as_int() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        let s = self.as_text()?;
        // CURRENT_TIMESTAMP format first, then fractional seconds, then RFC 3339.
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()
            .or_else(|| {
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc).naive_utc())
            })
    }

    /// Storage class of this value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Integer(_) => ValueKind::Integer,
            Value::Real(_) => ValueKind::Real,
            Value::Text(_) => ValueKind::Text,
            Value::Blob(_) => ValueKind::Blob,
        }
    }

    /// JSON projection used by the request dispatcher.
    ///
    /// Blobs become arrays of bytes; non-finite reals become `null`.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Integer(i) => JsonValue::from(*i),
            Value::Real(f) => serde_json::Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Blob(b) => JsonValue::Array(b.iter().map(|byte| JsonValue::from(*byte)).collect()),
        }
    }

    /// Build a parameter value from a JSON request argument.
    ///
    /// # Errors
    /// Returns `DbError::ParameterError` for integers outside the `i64` range;
    /// they are never narrowed to a lossy `Real`.
    pub fn from_json(json: &JsonValue) -> Result<Self, DbError> {
        match json {
            JsonValue::Null => Ok(Value::Null),
            JsonValue::Bool(b) => Ok(Value::from(*b)),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Integer(i))
                } else if n.is_u64() {
                    Err(DbError::ParameterError(format!(
                        "integer {n} does not fit in a 64-bit signed column"
                    )))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Real(f))
                } else {
                    Err(DbError::ParameterError(format!(
                        "number {n} cannot be represented"
                    )))
                }
            }
            JsonValue::String(s) => Ok(Value::Text(s.clone())),
            JsonValue::Array(_) | JsonValue::Object(_) => Ok(Value::Text(json.to_string())),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Blob(value.to_vec())
    }
}

// Timestamps are stored in the same text form CURRENT_TIMESTAMP produces.
impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::Text(value.format("%F %T%.f").to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::from(value.naive_utc())
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        Value::Text(value.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, ValueRef};
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

/// Storage class / column affinity of a value or column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Null,
    Integer,
    Real,
    Text,
    Blob,
    /// NUMERIC affinity: the engine picks integer or real per value.
    Numeric,
}

impl ValueKind {
    /// Column affinity for a declared type, following `SQLite`'s affinity rules.
    ///
    /// Columns without a declared type (expressions, `SELECT 1`) get BLOB affinity.
    #[must_use]
    pub fn from_decl_type(decl: Option<&str>) -> Self {
        let Some(decl) = decl else {
            return ValueKind::Blob;
        };
        let upper = decl.to_ascii_uppercase();
        if upper.contains("INT") {
            ValueKind::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            ValueKind::Text
        } else if upper.contains("BLOB") || upper.is_empty() {
            ValueKind::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            ValueKind::Real
        } else {
            ValueKind::Numeric
        }
    }
}

/// Typed extraction from a decoded [`Value`].
pub trait FromValue: Sized {
    /// Convert a stored value into `Self`.
    ///
    /// # Errors
    /// Returns `DbError::RowDecodeError` when the storage class does not match.
    fn from_value(value: &Value) -> Result<Self, DbError>;
}

fn mismatch(expected: &str, value: &Value) -> DbError {
    DbError::RowDecodeError(format!("expected {expected}, found {:?}", value.kind()))
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, DbError> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, DbError> {
        value.as_int().ok_or_else(|| mismatch("integer", value))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, DbError> {
        value.as_float().ok_or_else(|| mismatch("real", value))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, DbError> {
        value.as_bool().ok_or_else(|| mismatch("boolean (0 or 1)", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, DbError> {
        value
            .as_text()
            .map(str::to_owned)
            .ok_or_else(|| mismatch("text", value))
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self, DbError> {
        value
            .as_blob()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| mismatch("blob", value))
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Result<Self, DbError> {
        value.as_timestamp().ok_or_else(|| mismatch("timestamp text", value))
    }
}

impl FromValue for JsonValue {
    fn from_value(value: &Value) -> Result<Self, DbError> {
        let text = value.as_text().ok_or_else(|| mismatch("JSON text", value))?;
        serde_json::from_str(text)
            .map_err(|e| DbError::RowDecodeError(format!("invalid JSON text: {e}")))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, DbError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affinity_follows_declared_type() {
        assert_eq!(ValueKind::from_decl_type(Some("INTEGER")), ValueKind::Integer);
        assert_eq!(ValueKind::from_decl_type(Some("bigint")), ValueKind::Integer);
        assert_eq!(ValueKind::from_decl_type(Some("VARCHAR(20)")), ValueKind::Text);
        assert_eq!(ValueKind::from_decl_type(Some("DOUBLE")), ValueKind::Real);
        assert_eq!(ValueKind::from_decl_type(Some("BLOB")), ValueKind::Blob);
        assert_eq!(ValueKind::from_decl_type(Some("DECIMAL(10,2)")), ValueKind::Numeric);
        assert_eq!(ValueKind::from_decl_type(None), ValueKind::Blob);
    }

    #[test]
    fn json_arguments_map_to_storage_classes() -> Result<(), DbError> {
        assert_eq!(Value::from_json(&serde_json::json!(null))?, Value::Null);
        assert_eq!(Value::from_json(&serde_json::json!(true))?, Value::Integer(1));
        assert_eq!(Value::from_json(&serde_json::json!(7))?, Value::Integer(7));
        assert_eq!(Value::from_json(&serde_json::json!(2.5))?, Value::Real(2.5));
        assert_eq!(
            Value::from_json(&serde_json::json!(i64::MAX))?,
            Value::Integer(i64::MAX)
        );
        assert!(matches!(
            Value::from_json(&serde_json::json!(u64::MAX)),
            Err(DbError::ParameterError(_))
        ));
        assert!(matches!(
            Value::from_json(&serde_json::json!(1_u64 << 63)),
            Err(DbError::ParameterError(_))
        ));
        assert_eq!(
            Value::from_json(&serde_json::json!({"a": 1}))?,
            Value::Text("{\"a\":1}".into())
        );
        Ok(())
    }

    #[test]
    fn typed_extraction_rejects_wrong_class() {
        let err = i64::from_value(&Value::Text("x".into())).unwrap_err();
        assert!(matches!(err, DbError::RowDecodeError(_)));
        assert_eq!(Option::<i64>::from_value(&Value::Null).unwrap(), None);
    }

    #[test]
    fn timestamps_use_current_timestamp_format() {
        let dt = NaiveDateTime::parse_from_str("2024-03-01 10:30:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let value = Value::from(dt);
        assert_eq!(value.as_text(), Some("2024-03-01 10:30:00"));
        assert_eq!(value.as_timestamp(), Some(dt));
    }
}
