use std::fmt::Display;

use crate::error::DbError;
use crate::sqlite::transaction::{ControlStatement, TransactionMode, TxScope};

use super::Connection;

/// Keeps the wrapped-call depth in step with the call stack.
///
/// If the wrapped closure unwinds, the scope is rolled back on drop and the
/// connection is marked broken when that rollback fails.
struct ScopeGuard<'a> {
    conn: &'a Connection,
    scope: &'a TxScope,
    armed: bool,
}

impl<'a> ScopeGuard<'a> {
    fn enter(conn: &'a Connection, scope: &'a TxScope) -> Self {
        conn.depth.set(conn.depth.get() + 1);
        Self {
            conn,
            scope,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.conn.depth.set(self.conn.depth.get().saturating_sub(1));
        if self.armed && !self.conn.broken.get() {
            if let Err(e) = self.conn.rollback_scope(self.scope) {
                tracing::error!(error = %e, "rollback after panic failed");
                self.conn.mark_broken();
            }
        }
    }
}

impl Connection {
    /// Run `f` inside a transaction scope.
    ///
    /// At depth 0 the scope is `BEGIN <mode>` ... `COMMIT`; inside an open
    /// transaction it is a savepoint and `mode` is ignored. When `f` fails the
    /// scope's writes are rolled back and `f`'s error is returned unchanged.
    ///
    /// # Errors
    /// Returns `f`'s error, the `COMMIT` error (after rolling back), or
    /// `DbError::TransactionIntegrityError` when the rollback itself fails. In the
    /// last case the connection is marked broken and must be reopened.
    pub fn transaction<T, E, F>(&self, mode: TransactionMode, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<DbError> + Display,
    {
        let raw = self.raw()?;
        let scope = TxScope::enter(!raw.is_autocommit(), self.depth.get(), mode);
        self.issue(scope.begin())?;

        let mut guard = ScopeGuard::enter(self, &scope);
        let outcome = f(self);
        guard.disarm();

        match outcome {
            Ok(value) => match self.issue(scope.finish()) {
                Ok(()) => Ok(value),
                Err(finish_err) => {
                    tracing::warn!(error = %finish_err, "transaction commit failed; rolling back");
                    match self.rollback_scope(&scope) {
                        Ok(()) => Err(E::from(finish_err)),
                        Err(rollback) => Err(E::from(self.integrity_error(rollback, &finish_err))),
                    }
                }
            },
            // an inner scope already gave up on this connection
            Err(err) if self.broken.get() => Err(err),
            Err(err) => match self.rollback_scope(&scope) {
                Ok(()) => Err(err),
                Err(rollback) => Err(E::from(self.integrity_error(rollback, &err))),
            },
        }
    }

    /// [`Connection::transaction`] with `BEGIN DEFERRED`.
    ///
    /// # Errors
    /// See [`Connection::transaction`].
    pub fn deferred<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<DbError> + Display,
    {
        self.transaction(TransactionMode::Deferred, f)
    }

    /// [`Connection::transaction`] with `BEGIN IMMEDIATE`.
    ///
    /// # Errors
    /// See [`Connection::transaction`].
    pub fn immediate<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<DbError> + Display,
    {
        self.transaction(TransactionMode::Immediate, f)
    }

    /// [`Connection::transaction`] with `BEGIN EXCLUSIVE`.
    ///
    /// # Errors
    /// See [`Connection::transaction`].
    pub fn exclusive<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<DbError> + Display,
    {
        self.transaction(TransactionMode::Exclusive, f)
    }

    pub(crate) fn rollback_scope(&self, scope: &TxScope) -> Result<(), DbError> {
        let raw = self.raw.as_ref().ok_or(DbError::ConnectionClosed)?;
        if raw.is_autocommit() {
            // the engine already rolled the whole transaction back (e.g. SQLITE_FULL)
            tracing::debug!(depth = self.depth.get(), "transaction already rolled back by engine");
            return Ok(());
        }
        match scope {
            TxScope::Root(_) => self.issue(ControlStatement::Rollback),
            TxScope::Savepoint(name) => {
                self.issue(ControlStatement::RollbackTo(name))?;
                self.issue(ControlStatement::Release(name))
            }
        }
    }

    fn issue(&self, stmt: ControlStatement<'_>) -> Result<(), DbError> {
        let raw = self.raw()?;
        if stmt.is_rollback() && self.force_rollback_failure.get() {
            return Err(forced_rollback_failure());
        }
        let sql = stmt.to_string();
        tracing::trace!(sql = %sql, depth = self.depth.get(), "transaction control");
        raw.execute_batch(&sql)?;
        let mut stats = self.tx_stats.get();
        stats.record(stmt);
        self.tx_stats.set(stats);
        Ok(())
    }

    fn integrity_error(&self, rollback: DbError, original: &dyn Display) -> DbError {
        tracing::error!(
            rollback = %rollback,
            original = %original,
            "rollback failed; transaction state is unknown"
        );
        self.mark_broken();
        DbError::TransactionIntegrityError {
            rollback: Box::new(rollback),
            original: original.to_string(),
        }
    }
}

fn forced_rollback_failure() -> DbError {
    DbError::from(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error {
            code: rusqlite::ErrorCode::DatabaseBusy,
            extended_code: rusqlite::ffi::SQLITE_BUSY,
        },
        Some("forced rollback failure".into()),
    ))
}
