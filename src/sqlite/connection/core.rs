use std::cell::{Cell, RefCell};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::DbError;
use crate::sqlite::config::{OpenOptions, Target};
use crate::sqlite::transaction::TransactionStats;

use super::prepared::DescriptorCache;

/// The single owned handle to the application database.
///
/// Statements, cursors and backups borrow the connection, so none of them can
/// outlive it or survive a [`Connection::close`]. Not `Sync`: every operation
/// runs to completion before the next one starts.
pub struct Connection {
    pub(crate) raw: Option<rusqlite::Connection>,
    pub(crate) target: Target,
    pub(crate) options: OpenOptions,
    pub(crate) default_safe_integers: Cell<bool>,
    pub(crate) statements: RefCell<DescriptorCache>,
    pub(crate) compiled_count: Cell<u64>,
    pub(crate) depth: Cell<u32>,
    pub(crate) broken: Cell<bool>,
    pub(crate) tx_stats: Cell<TransactionStats>,
    pub(crate) force_rollback_failure: Cell<bool>,
}

impl Connection {
    /// Open a database file, or an in-memory database for `":memory:"`.
    ///
    /// Foreign-key enforcement is always switched on after opening.
    ///
    /// # Errors
    /// Returns `DbError::ConfigError` for invalid options and `DbError::SqlError` if the
    /// engine cannot open or configure the database.
    pub fn open(target: impl Into<Target>, options: OpenOptions) -> Result<Self, DbError> {
        let target = target.into();
        options.validate(&target)?;
        let raw = open_raw(&target, &options)?;
        tracing::debug!(db = %target, readonly = options.readonly, "opened database");
        Ok(Self {
            raw: Some(raw),
            default_safe_integers: Cell::new(options.safe_integers),
            target,
            options,
            statements: RefCell::new(DescriptorCache::default()),
            compiled_count: Cell::new(0),
            depth: Cell::new(0),
            broken: Cell::new(false),
            tx_stats: Cell::new(TransactionStats::default()),
            force_rollback_failure: Cell::new(false),
        })
    }

    /// Open a fresh in-memory database with default options.
    ///
    /// # Errors
    /// Returns `DbError` if the engine fails to open.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::open(Target::Memory, OpenOptions::default())
    }

    /// Release the engine handle. Idempotent.
    ///
    /// # Errors
    /// Returns `DbError::SqlError` if the engine refuses to close; the handle is
    /// dropped either way.
    pub fn close(&mut self) -> Result<(), DbError> {
        self.statements.borrow_mut().clear();
        self.depth.set(0);
        self.broken.set(false);
        let Some(raw) = self.raw.take() else {
            return Ok(());
        };
        tracing::debug!(db = %self.target, "closing database");
        raw.close().map_err(|(_, e)| DbError::from(e))
    }

    /// Close and open again with the original target and options.
    ///
    /// This is the recovery path after a [`DbError::TransactionIntegrityError`].
    /// In-memory databases come back empty.
    ///
    /// # Errors
    /// Returns `DbError` if closing or reopening fails.
    pub fn reopen(&mut self) -> Result<(), DbError> {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "close before reopen failed; continuing");
        }
        self.options.validate(&self.target)?;
        self.raw = Some(open_raw(&self.target, &self.options)?);
        tracing::debug!(db = %self.target, "reopened database");
        Ok(())
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.raw.is_some()
    }

    #[must_use]
    pub fn is_readonly(&self) -> bool {
        self.options.readonly
    }

    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.target.is_memory()
    }

    /// True while the engine has an open transaction (not in autocommit mode).
    #[must_use]
    pub fn is_in_transaction(&self) -> bool {
        self.raw.as_ref().is_some_and(|raw| !raw.is_autocommit())
    }

    /// True after a rollback failed to apply; only `close`/`reopen` clear it.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken.get()
    }

    /// Number of wrapped transaction calls currently on the stack.
    #[must_use]
    pub fn transaction_depth(&self) -> u32 {
        self.depth.get()
    }

    #[must_use]
    pub fn transaction_stats(&self) -> TransactionStats {
        self.tx_stats.get()
    }

    #[must_use]
    pub fn target(&self) -> &Target {
        &self.target
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.target.path()
    }

    #[must_use]
    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.options.timeout_ms)
    }

    /// Default safe-integer mode for statements prepared from now on.
    pub fn set_default_safe_integers(&self, safe: bool) {
        self.default_safe_integers.set(safe);
    }

    #[must_use]
    pub fn default_safe_integers(&self) -> bool {
        self.default_safe_integers.get()
    }

    /// Run synchronous `rusqlite` logic against the underlying connection.
    ///
    /// # Errors
    /// Returns `DbError::ConnectionClosed`/`ConnectionBroken` or whatever `func` returns.
    pub fn with_raw<F, R>(&self, func: F) -> Result<R, DbError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<R, DbError>,
    {
        func(self.raw()?)
    }

    pub(crate) fn raw(&self) -> Result<&rusqlite::Connection, DbError> {
        if self.broken.get() {
            return Err(DbError::ConnectionBroken);
        }
        self.raw.as_ref().ok_or(DbError::ConnectionClosed)
    }

    pub(crate) fn mark_broken(&self) {
        tracing::error!(db = %self.target, "connection marked broken; transaction state unknown");
        self.broken.set(true);
    }

    #[doc(hidden)]
    pub fn set_force_rollback_failure_for_tests(&self, force: bool) {
        self.force_rollback_failure.set(force);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.target)
            .field("open", &self.is_open())
            .field("readonly", &self.options.readonly)
            .field("depth", &self.depth.get())
            .field("broken", &self.broken.get())
            .finish_non_exhaustive()
    }
}

pub(crate) fn open_raw(
    target: &Target,
    options: &OpenOptions,
) -> Result<rusqlite::Connection, DbError> {
    let flags = options.open_flags();
    let raw = match target {
        Target::Memory => rusqlite::Connection::open_in_memory_with_flags(flags)?,
        Target::File(path) => rusqlite::Connection::open_with_flags(path, flags)?,
    };
    raw.busy_timeout(Duration::from_millis(options.timeout_ms))?;
    raw.set_prepared_statement_cache_capacity(options.statement_cache_capacity);
    raw.pragma_update(None, "foreign_keys", "ON")?;
    if let Some(mode) = options.journal_mode {
        let applied: String =
            raw.pragma_update_and_check(None, "journal_mode", mode.as_sql(), |row| row.get(0))?;
        if !applied.eq_ignore_ascii_case(mode.as_sql()) {
            tracing::warn!(requested = mode.as_sql(), applied = %applied, "journal mode not applied");
        }
    }
    Ok(raw)
}

/// Side files SQLite keeps next to a database in WAL/rollback-journal mode.
pub(crate) fn side_files(path: &Path) -> [PathBuf; 3] {
    let base = path.as_os_str().to_owned();
    let with = |suffix: &str| {
        let mut s = base.clone();
        s.push(suffix);
        PathBuf::from(s)
    };
    [with("-wal"), with("-shm"), with("-journal")]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_enables_foreign_keys() -> Result<(), DbError> {
        let conn = Connection::open_in_memory()?;
        let fk: i64 = conn.with_raw(|raw| {
            raw.query_row("PRAGMA foreign_keys", [], |row| row.get(0))
                .map_err(DbError::from)
        })?;
        assert_eq!(fk, 1);
        Ok(())
    }

    #[test]
    fn close_is_idempotent_and_blocks_use() -> Result<(), DbError> {
        let mut conn = Connection::open_in_memory()?;
        assert!(conn.is_open());
        conn.close()?;
        conn.close()?;
        assert!(!conn.is_open());
        assert!(matches!(conn.raw(), Err(DbError::ConnectionClosed)));
        Ok(())
    }

    #[test]
    fn side_files_append_suffixes() {
        let files = side_files(Path::new("/tmp/app.db"));
        assert_eq!(files[0], PathBuf::from("/tmp/app.db-wal"));
        assert_eq!(files[1], PathBuf::from("/tmp/app.db-shm"));
    }
}
