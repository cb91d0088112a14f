use std::fmt;
use std::sync::Arc;

use rusqlite::{CachedStatement, Rows, Statement};

use crate::error::DbError;
use crate::results::{Row, RowDescriptor, RunResult};

use super::connection::Connection;
use super::params::{Params, bind_params};
use super::query::{build_row, describe_columns};

/// Compiled form of one SQL text, shared by every handle prepared from it.
///
/// The connection keeps one per distinct SQL string, so preparing the same text
/// twice hands back the same `Arc`.
#[derive(Debug)]
pub struct CompiledStatement {
    sql: String,
    parameter_count: usize,
    descriptor: Arc<RowDescriptor>,
    readonly: bool,
}

impl CompiledStatement {
    pub(crate) fn describe(sql: &str, stmt: &Statement<'_>) -> Self {
        Self {
            sql: sql.to_owned(),
            parameter_count: stmt.parameter_count(),
            descriptor: Arc::new(describe_columns(stmt)),
            readonly: stmt.readonly(),
        }
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    #[must_use]
    pub fn columns(&self) -> &Arc<RowDescriptor> {
        &self.descriptor
    }

    /// True when the statement produces result rows.
    #[must_use]
    pub fn is_reader(&self) -> bool {
        !self.descriptor.is_empty()
    }

    #[must_use]
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }
}

/// Statement handle prepared on a [`Connection`].
///
/// Bindings never leak between executions: every call binds all parameter
/// slots again. While a [`RowCursor`] is live the handle is mutably borrowed,
/// so it cannot be re-executed underneath the cursor.
pub struct PreparedStatement<'conn> {
    conn: &'conn Connection,
    compiled: Arc<CompiledStatement>,
    stmt: CachedStatement<'conn>,
    safe_integers: bool,
}

impl<'conn> PreparedStatement<'conn> {
    pub(crate) fn new(
        conn: &'conn Connection,
        compiled: Arc<CompiledStatement>,
        stmt: CachedStatement<'conn>,
        safe_integers: bool,
    ) -> Self {
        Self {
            conn,
            compiled,
            stmt,
            safe_integers,
        }
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        self.compiled.sql()
    }

    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.compiled.parameter_count()
    }

    #[must_use]
    pub fn columns(&self) -> &RowDescriptor {
        self.compiled.columns()
    }

    #[must_use]
    pub fn is_reader(&self) -> bool {
        self.compiled.is_reader()
    }

    #[must_use]
    pub fn is_readonly(&self) -> bool {
        self.compiled.is_readonly()
    }

    /// The shared compiled form backing this handle.
    #[must_use]
    pub fn compiled(&self) -> &Arc<CompiledStatement> {
        &self.compiled
    }

    /// Override the integer decoding policy for this handle.
    pub fn safe_integers(&mut self, safe: bool) -> &mut Self {
        self.safe_integers = safe;
        self
    }

    #[must_use]
    pub fn uses_safe_integers(&self) -> bool {
        self.safe_integers
    }

    /// Execute for its side effects.
    ///
    /// Result rows (for example from `RETURNING`) are stepped through and
    /// discarded. Read-only statements, and writes that touched no rows (DDL,
    /// pragmas), report zero changes.
    ///
    /// # Errors
    /// Returns `DbError::BindError` for mismatched parameters and `DbError::SqlError`
    /// when the engine rejects the statement.
    pub fn run(&mut self, params: impl Into<Params>) -> Result<RunResult, DbError> {
        let conn = self.conn;
        let raw = conn.raw()?;
        self.bind(&params.into())?;
        let total_before = raw.total_changes();
        {
            let mut rows = self.stmt.raw_query();
            while rows.next()?.is_some() {}
        }
        // the engine's per-statement count is left untouched by DDL and pragmas
        let changes = if self.compiled.is_readonly() || raw.total_changes() == total_before {
            0
        } else {
            raw.changes()
        };
        Ok(RunResult {
            changes,
            last_insert_rowid: raw.last_insert_rowid(),
        })
    }

    /// First result row, or `None` when the query matches nothing.
    ///
    /// # Errors
    /// Returns `DbError::ExecutionError` for statements that return no data, plus
    /// binding and decoding failures.
    pub fn get(&mut self, params: impl Into<Params>) -> Result<Option<Row>, DbError> {
        self.ensure_reader("get")?;
        self.conn.raw()?;
        self.bind(&params.into())?;
        let mut descriptor = Arc::clone(self.compiled.columns());
        let safe = self.safe_integers;
        let mut rows = self.stmt.raw_query();
        let row = match rows.next()? {
            Some(row) => Some(build_row(row, &mut descriptor, safe)?),
            None => None,
        };
        Ok(row)
    }

    /// Every result row, materialised.
    ///
    /// # Errors
    /// Same failure modes as [`PreparedStatement::get`].
    pub fn all(&mut self, params: impl Into<Params>) -> Result<Vec<Row>, DbError> {
        self.iterate(params)?.collect()
    }

    /// Lazily step through the result rows.
    ///
    /// Each call re-executes from the start; a finished cursor stays finished.
    ///
    /// # Errors
    /// Same failure modes as [`PreparedStatement::get`]; row-level errors surface
    /// from the cursor.
    pub fn iterate(&mut self, params: impl Into<Params>) -> Result<RowCursor<'_>, DbError> {
        self.ensure_reader("iterate")?;
        self.conn.raw()?;
        self.bind(&params.into())?;
        let descriptor = Arc::clone(self.compiled.columns());
        let safe_integers = self.safe_integers;
        Ok(RowCursor {
            rows: Some(self.stmt.raw_query()),
            descriptor,
            safe_integers,
        })
    }

    fn bind(&mut self, params: &Params) -> Result<(), DbError> {
        tracing::trace!(sql = %self.compiled.sql(), params = params.len(), "execute");
        bind_params(&mut self.stmt, params)
    }

    fn ensure_reader(&self, op: &str) -> Result<(), DbError> {
        if self.compiled.is_reader() {
            Ok(())
        } else {
            Err(DbError::ExecutionError(format!(
                "statement does not return data; use run() instead of {op}()"
            )))
        }
    }
}

impl fmt::Debug for PreparedStatement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("sql", &self.compiled.sql())
            .field("safe_integers", &self.safe_integers)
            .finish_non_exhaustive()
    }
}

/// Forward-only cursor over the rows of one execution.
///
/// The engine cursor is released when the rows run out, on an engine error,
/// on [`RowCursor::close`], or when the cursor is dropped.
pub struct RowCursor<'s> {
    rows: Option<Rows<'s>>,
    descriptor: Arc<RowDescriptor>,
    safe_integers: bool,
}

impl RowCursor<'_> {
    /// Advance one row.
    ///
    /// # Errors
    /// Returns `DbError` if the engine fails to step or the row cannot be decoded.
    pub fn next_row(&mut self) -> Result<Option<Row>, DbError> {
        let Some(rows) = self.rows.as_mut() else {
            return Ok(None);
        };
        let step = match rows.next() {
            Ok(Some(row)) => Some(build_row(row, &mut self.descriptor, self.safe_integers)),
            Ok(None) => None,
            Err(e) => Some(Err(DbError::from(e))),
        };
        match step {
            None => {
                self.rows = None;
                Ok(None)
            }
            Some(Err(e @ DbError::SqlError { .. })) => {
                self.rows = None;
                Err(e)
            }
            Some(result) => result.map(Some),
        }
    }

    /// Release the engine cursor before the rows are exhausted.
    pub fn close(&mut self) {
        self.rows = None;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.rows.is_none()
    }

    #[must_use]
    pub fn columns(&self) -> &RowDescriptor {
        &self.descriptor
    }
}

impl Iterator for RowCursor<'_> {
    type Item = Result<Row, DbError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

impl fmt::Debug for RowCursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowCursor")
            .field("closed", &self.is_closed())
            .field("columns", &self.descriptor.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::sqlite::connection::Connection;
    use crate::types::Value;

    #[test]
    fn readonly_statements_report_no_changes() -> Result<(), Box<dyn std::error::Error>> {
        let conn = Connection::open_in_memory()?;
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT); INSERT INTO t (v) VALUES ('a');")?;
        let mut select = conn.prepare("SELECT v FROM t")?;
        assert!(select.is_readonly());
        assert_eq!(select.run(())?.changes, 0);
        Ok(())
    }

    #[test]
    fn returning_rows_are_drained_by_run() -> Result<(), Box<dyn std::error::Error>> {
        let conn = Connection::open_in_memory()?;
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)")?;
        let mut insert = conn.prepare("INSERT INTO t (v) VALUES (?) RETURNING id")?;
        assert!(insert.is_reader());
        let result = insert.run(vec![Value::from("x")])?;
        assert_eq!(result.changes, 1);
        assert_eq!(result.last_insert_rowid, 1);
        Ok(())
    }

    #[test]
    fn writers_cannot_be_queried() -> Result<(), Box<dyn std::error::Error>> {
        let conn = Connection::open_in_memory()?;
        conn.execute("CREATE TABLE t (v TEXT)")?;
        let mut insert = conn.prepare("INSERT INTO t (v) VALUES ('a')")?;
        assert!(!insert.is_reader());
        let err = insert.get(()).unwrap_err();
        assert!(err.to_string().contains("does not return data"));
        Ok(())
    }

    #[test]
    fn closed_cursor_yields_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let conn = Connection::open_in_memory()?;
        let mut stmt = conn.prepare("SELECT 1 UNION ALL SELECT 2")?;
        let mut cursor = stmt.iterate(())?;
        assert_eq!(cursor.next_row()?.map(|r| r.get_at::<i64>(0)).transpose()?, Some(1));
        cursor.close();
        assert!(cursor.is_closed());
        assert!(cursor.next_row()?.is_none());
        Ok(())
    }
}
