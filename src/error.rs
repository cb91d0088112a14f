use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Engine result code attached to [`DbError::SqlError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlErrorCode {
    /// Primary `SQLite` result code class.
    pub primary: rusqlite::ErrorCode,
    /// Extended result code (e.g. 2067 for `SQLITE_CONSTRAINT_UNIQUE`).
    pub extended: i32,
}

impl SqlErrorCode {
    /// True for any `SQLITE_CONSTRAINT*` failure.
    #[must_use]
    pub fn is_constraint(&self) -> bool {
        self.primary == rusqlite::ErrorCode::ConstraintViolation
    }

    /// True when the engine reported `SQLITE_BUSY` or `SQLITE_LOCKED`.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(
            self.primary,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        )
    }
}

impl fmt::Display for SqlErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{}", self.primary, self.extended)
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("SQL error ({code}): {message}")]
    SqlError { code: SqlErrorCode, message: String },

    #[error("Parameter binding error: {0}")]
    BindError(String),

    #[error("Row decode error: {0}")]
    RowDecodeError(String),

    #[error("Integer {value} is outside the safe integer range; enable safe integers to read it")]
    IntegerOverflowError { value: i64 },

    #[error("Directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Invalid backup target: {0}")]
    InvalidTarget(String),

    #[error("Progress callback error: {0}")]
    ProgressCallbackError(String),

    #[error("Transaction integrity error: {rollback} (original failure: {original})")]
    TransactionIntegrityError {
        rollback: Box<DbError>,
        original: String,
    },

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Connection is broken after a failed rollback; reopen it before further use")]
    ConnectionBroken,

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DbError {
    /// Engine code for SQL failures, `None` for everything else.
    #[must_use]
    pub fn sql_code(&self) -> Option<SqlErrorCode> {
        match self {
            DbError::SqlError { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True when the connection should be restarted before further use.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DbError::TransactionIntegrityError { .. } | DbError::ConnectionBroken
        )
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::Error as E;
        match err {
            E::SqliteFailure(ffi_err, msg) => DbError::SqlError {
                code: SqlErrorCode {
                    primary: ffi_err.code,
                    extended: ffi_err.extended_code,
                },
                message: msg.unwrap_or_else(|| ffi_err.to_string()),
            },
            E::InvalidParameterCount(given, expected) => DbError::BindError(format!(
                "expected {expected} parameters, got {given}"
            )),
            E::InvalidParameterName(name) => {
                DbError::BindError(format!("unknown parameter name {name}"))
            }
            E::ToSqlConversionFailure(e) => DbError::BindError(e.to_string()),
            E::IntegralValueOutOfRange(_, value) => DbError::IntegerOverflowError { value },
            E::InvalidColumnIndex(idx) => {
                DbError::RowDecodeError(format!("column index {idx} out of range"))
            }
            E::InvalidColumnName(name) => {
                DbError::RowDecodeError(format!("no column named {name}"))
            }
            E::InvalidColumnType(idx, name, ty) => DbError::RowDecodeError(format!(
                "column {idx} ({name}) has unexpected type {ty}"
            )),
            E::Utf8Error(e) => DbError::RowDecodeError(format!("invalid UTF-8 text: {e}")),
            E::FromSqlConversionFailure(idx, ty, e) => DbError::RowDecodeError(format!(
                "column {idx} of type {ty} could not be converted: {e}"
            )),
            other => DbError::ExecutionError(other.to_string()),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_failure_keeps_engine_codes() {
        let raw = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::ConstraintViolation,
                extended_code: 2067,
            },
            Some("UNIQUE constraint failed: t.id".into()),
        );
        let err = DbError::from(raw);
        let code = err.sql_code().expect("sql code");
        assert!(code.is_constraint());
        assert_eq!(code.extended, 2067);
        assert!(err.to_string().contains("UNIQUE constraint failed"));
    }

    #[test]
    fn parameter_count_maps_to_bind_error() {
        let err = DbError::from(rusqlite::Error::InvalidParameterCount(1, 2));
        assert!(matches!(err, DbError::BindError(_)));
    }

    #[test]
    fn integrity_errors_are_fatal() {
        let err = DbError::TransactionIntegrityError {
            rollback: Box::new(DbError::ConnectionClosed),
            original: "boom".into(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("boom"));
        assert!(!DbError::ConnectionClosed.is_fatal());
    }
}
