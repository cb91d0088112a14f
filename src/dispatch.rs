//! Named-operation front end over a single [`Connection`].
//!
//! The presentation layer sends [`Request`]s naming a registered [`Operation`]
//! with JSON arguments and gets plain JSON back.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::DbError;
use crate::results::Row;
use crate::sqlite::backup::{BackupOptions, BackupProgress};
use crate::sqlite::config::{OpenOptions, Target};
use crate::sqlite::connection::Connection;
use crate::sqlite::params::Params;

/// How an operation's statement is executed and what it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Array of row objects.
    All,
    /// One row object, or `null`.
    Get,
    /// `{ "changes": n, "lastInsertRowid": id }`.
    Run,
    /// Parameterless batch; returns `null`.
    Execute,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    pub sql: String,
    pub kind: OperationKind,
}

impl Operation {
    pub fn new(name: impl Into<String>, sql: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub operation: String,
    #[serde(default)]
    pub params: Vec<JsonValue>,
}

impl Request {
    pub fn new(operation: impl Into<String>, params: Vec<JsonValue>) -> Self {
        Self {
            operation: operation.into(),
            params,
        }
    }
}

pub type Response = JsonValue;

/// Database location, open options and the operation registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    pub path: String,
    #[serde(default)]
    pub options: OpenOptions,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

impl DatabaseConfig {
    /// # Errors
    /// Returns `DbError::Json` if the text is not a valid configuration.
    pub fn from_json_str(text: &str) -> Result<Self, DbError> {
        Ok(serde_json::from_str(text)?)
    }

    /// # Errors
    /// Returns `DbError::Io` if the file cannot be read and `DbError::Json` if it
    /// does not parse.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    #[must_use]
    pub fn target(&self) -> Target {
        Target::parse(&self.path)
    }
}

/// Routes requests to registered operations on the one owned connection.
#[derive(Debug)]
pub struct Dispatcher {
    conn: Connection,
    operations: HashMap<String, Operation>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            operations: HashMap::new(),
        }
    }

    /// Open the configured database and register its operations.
    ///
    /// # Errors
    /// Returns `DbError` if the connection cannot be opened.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, DbError> {
        let conn = Connection::open(config.target(), config.options.clone())?;
        let mut dispatcher = Self::new(conn);
        for op in &config.operations {
            dispatcher.register(op.clone());
        }
        Ok(dispatcher)
    }

    /// Add or replace an operation, returning the one it replaced.
    pub fn register(&mut self, operation: Operation) -> Option<Operation> {
        tracing::debug!(operation = %operation.name, kind = ?operation.kind, "registered operation");
        self.operations.insert(operation.name.clone(), operation)
    }

    #[must_use]
    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.operations.get(name)
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.operations.values()
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    #[must_use]
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Execute one request.
    ///
    /// # Errors
    /// Returns `DbError::UnknownOperation` for unregistered names,
    /// `DbError::ParameterError` for unusable arguments, and any statement error.
    pub fn dispatch(&self, request: &Request) -> Result<Response, DbError> {
        let op = self
            .operations
            .get(&request.operation)
            .ok_or_else(|| DbError::UnknownOperation(request.operation.clone()))?;
        tracing::debug!(operation = %op.name, params = request.params.len(), "dispatch");

        if op.kind == OperationKind::Execute {
            if !request.params.is_empty() {
                return Err(DbError::ParameterError(format!(
                    "operation {} takes no parameters",
                    op.name
                )));
            }
            self.conn.execute(&op.sql)?;
            return Ok(JsonValue::Null);
        }

        let params = Params::from_json(&request.params)?;
        let mut stmt = self.conn.prepare(&op.sql)?;
        match op.kind {
            OperationKind::All => {
                let rows = stmt.all(params)?;
                Ok(JsonValue::Array(rows.iter().map(Row::to_json).collect()))
            }
            OperationKind::Get => Ok(stmt
                .get(params)?
                .map_or(JsonValue::Null, |row| row.to_json())),
            OperationKind::Run => Ok(serde_json::to_value(stmt.run(params)?)?),
            OperationKind::Execute => Ok(JsonValue::Null),
        }
    }

    /// Execute several requests in one immediate transaction.
    ///
    /// Either every request takes effect or none does.
    ///
    /// # Errors
    /// Returns the first failing request's error after rolling back.
    pub fn dispatch_batch(&self, requests: &[Request]) -> Result<Vec<Response>, DbError> {
        self.conn
            .immediate(|_| requests.iter().map(|req| self.dispatch(req)).collect())
    }

    /// Back up the main database to `path`.
    ///
    /// # Errors
    /// See [`Connection::backup_to`].
    pub async fn backup(&self, path: impl AsRef<Path>) -> Result<BackupProgress, DbError> {
        self.conn.backup_to(path, BackupOptions::default()).await
    }

    /// Replace the database with the file at `path` and reopen.
    ///
    /// # Errors
    /// See [`Connection::restore_from`].
    pub fn restore(&mut self, path: impl AsRef<Path>) -> Result<(), DbError> {
        self.conn.restore_from(path)
    }

    /// Close the connection; later requests fail with `DbError::ConnectionClosed`.
    ///
    /// # Errors
    /// Returns `DbError` if the engine refuses to close.
    pub fn shutdown(&mut self) -> Result<(), DbError> {
        tracing::debug!("dispatcher shutting down");
        self.conn.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_parses_operations() -> Result<(), DbError> {
        let config = DatabaseConfig::from_json_str(
            r#"{
                "path": ":memory:",
                "options": { "timeoutMs": 250 },
                "operations": [
                    { "name": "list", "sql": "SELECT 1 AS one", "kind": "all" }
                ]
            }"#,
        )?;
        assert!(config.target().is_memory());
        assert_eq!(config.options.timeout_ms, 250);
        assert_eq!(config.operations[0].kind, OperationKind::All);
        Ok(())
    }

    #[test]
    fn unknown_operation_is_reported() -> Result<(), DbError> {
        let dispatcher = Dispatcher::new(Connection::open_in_memory()?);
        let err = dispatcher.dispatch(&Request::new("missing", vec![])).unwrap_err();
        assert!(matches!(err, DbError::UnknownOperation(name) if name == "missing"));
        Ok(())
    }

    #[test]
    fn execute_operations_reject_arguments() -> Result<(), DbError> {
        let mut dispatcher = Dispatcher::new(Connection::open_in_memory()?);
        dispatcher.register(Operation::new("init", "CREATE TABLE t (v)", OperationKind::Execute));
        let err = dispatcher
            .dispatch(&Request::new("init", vec![json!(1)]))
            .unwrap_err();
        assert!(matches!(err, DbError::ParameterError(_)));
        assert_eq!(dispatcher.dispatch(&Request::new("init", vec![]))?, JsonValue::Null);
        Ok(())
    }
}
