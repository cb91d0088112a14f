use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;

use crate::error::DbError;
use crate::results::Row;
use crate::sqlite::config::{CheckpointMode, Target};
use crate::types::Value;

use super::Connection;
use super::core::side_files;

/// Outcome of `PRAGMA wal_checkpoint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointResult {
    /// The checkpoint could not complete because of a concurrent reader or writer.
    pub busy: bool,
    /// Frames in the WAL, or -1 when the database is not in WAL mode.
    pub log_frames: i64,
    /// Frames copied back into the database file, or -1.
    pub checkpointed: i64,
}

impl Connection {
    /// Run one or more statements that produce no rows.
    ///
    /// # Errors
    /// Returns `DbError::SqlError` carrying the engine code for the first failing statement.
    pub fn execute(&self, sql: &str) -> Result<(), DbError> {
        let raw = self.raw()?;
        tracing::trace!(sql, "execute batch");
        raw.execute_batch(sql)?;
        Ok(())
    }

    /// Run a pragma (without the `PRAGMA` keyword) and return its rows.
    ///
    /// # Errors
    /// Returns `DbError` if the pragma fails.
    pub fn pragma(&self, pragma: &str) -> Result<Vec<Row>, DbError> {
        let mut stmt = self.prepare(&format!("PRAGMA {pragma}"))?;
        if stmt.is_reader() {
            stmt.all(())
        } else {
            stmt.run(())?;
            Ok(Vec::new())
        }
    }

    /// First column of the first row a pragma returns.
    ///
    /// # Errors
    /// Returns `DbError` if the pragma fails.
    pub fn pragma_value(&self, pragma: &str) -> Result<Option<Value>, DbError> {
        Ok(self
            .pragma(pragma)?
            .into_iter()
            .next()
            .and_then(|row| row.into_values().into_iter().next()))
    }

    /// Checkpoint the write-ahead log.
    ///
    /// # Errors
    /// Returns `DbError` if the engine rejects the checkpoint.
    pub fn checkpoint(&self, mode: CheckpointMode) -> Result<CheckpointResult, DbError> {
        let raw = self.raw()?;
        let sql = format!("PRAGMA wal_checkpoint({})", mode.as_sql());
        tracing::trace!(sql = %sql, "checkpoint");
        let result = raw.query_row(&sql, [], |row| {
            Ok(CheckpointResult {
                busy: row.get::<_, i64>(0)? != 0,
                log_frames: row.get(1)?,
                checkpointed: row.get(2)?,
            })
        })?;
        Ok(result)
    }

    /// Replace the database file with `source` and reopen.
    ///
    /// Stale `-wal`, `-shm` and `-journal` files of the current database are
    /// removed first. Only the main file of `source` is copied, so checkpoint it
    /// before handing it over.
    ///
    /// # Errors
    /// Returns `DbError::InvalidTarget` for in-memory connections or when `source` is
    /// the open database, `DbError::ConfigError` if `source` does not exist, and
    /// `DbError::Io` for copy failures. After a failed copy the original file is
    /// reopened, so the connection stays usable.
    pub fn restore_from(&mut self, source: impl AsRef<Path>) -> Result<(), DbError> {
        let source = source.as_ref();
        let Target::File(path) = self.target.clone() else {
            return Err(DbError::InvalidTarget(
                "cannot restore into an in-memory database".into(),
            ));
        };
        if !source.is_file() {
            return Err(DbError::ConfigError(format!(
                "restore source {} does not exist",
                source.display()
            )));
        }
        if path.exists() && fs::canonicalize(source)? == fs::canonicalize(&path)? {
            return Err(DbError::InvalidTarget(format!(
                "{} is the open database",
                source.display()
            )));
        }

        tracing::debug!(from = %source.display(), to = %path.display(), "restoring database");
        if let Err(e) = self.close().and_then(|()| replace_file(source, &path)) {
            if let Err(reopen_err) = self.reopen() {
                tracing::error!(error = %reopen_err, "reopen after failed restore failed");
            }
            return Err(e);
        }
        self.reopen()
    }
}

fn replace_file(source: &Path, path: &Path) -> Result<(), DbError> {
    for side in side_files(path) {
        match fs::remove_file(&side) {
            Ok(()) => tracing::trace!(file = %side.display(), "removed side file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    fs::copy(source, path)?;
    Ok(())
}
