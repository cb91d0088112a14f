use std::io::Write;
use std::path::Path;

use rusqlite::DatabaseName;
use rusqlite::backup::{Backup, Progress, StepResult};

use crate::error::DbError;
use crate::sqlite::backup::{
    BUSY_BACKOFF, BackupOptions, BackupProgress, StepPlan, database_name, validate_attachment,
};
use crate::sqlite::config::{Target, parent_dir};

use super::Connection;

impl Connection {
    /// Copy a database schema into `destination` with the online backup API.
    ///
    /// The copy runs in bounded steps and yields to the runtime between them, so
    /// other tasks on the same thread keep running. The future borrows the
    /// connection and is not `Send`; drive it on a current-thread runtime or a
    /// `LocalSet`. A failed backup leaves whatever was written in place.
    ///
    /// # Errors
    /// * `DbError::ConfigError` for an empty or unknown attachment.
    /// * `DbError::InvalidTarget` when `destination` names an in-memory database.
    /// * `DbError::DirectoryNotFound` when the destination directory is missing;
    ///   no file is created in that case.
    /// * `DbError::ProgressCallbackError` when the callback asks for an invalid step.
    /// * `DbError::SqlError` for engine failures while copying.
    pub async fn backup_to(
        &self,
        destination: impl AsRef<Path>,
        options: BackupOptions<'_>,
    ) -> Result<BackupProgress, DbError> {
        let BackupOptions {
            attachment,
            step_pages,
            mut on_progress,
        } = options;
        validate_attachment(&attachment)?;

        let destination = destination.as_ref();
        let dest_text = destination.to_string_lossy();
        if Target::parse(dest_text.trim()).is_memory() {
            return Err(DbError::InvalidTarget(format!(
                "cannot back up into {:?}",
                dest_text.as_ref()
            )));
        }
        if let Some(dir) = parent_dir(destination) {
            let is_dir = tokio::fs::metadata(dir)
                .await
                .map(|meta| meta.is_dir())
                .unwrap_or(false);
            if !is_dir {
                return Err(DbError::DirectoryNotFound(dir.to_path_buf()));
            }
        }
        let is_new_file = !tokio::fs::try_exists(destination).await.unwrap_or(false);
        let mut plan = StepPlan::new(step_pages)?;

        let raw = self.raw()?;
        ensure_attachment(raw, &attachment)?;
        tracing::debug!(
            attachment = %attachment,
            destination = %destination.display(),
            is_new_file,
            "starting backup"
        );

        let mut dest = rusqlite::Connection::open(destination)?;
        let backup = Backup::new_with_names(
            raw,
            database_name(&attachment),
            &mut dest,
            DatabaseName::Main,
        )?;

        loop {
            let pages = plan.next_step();
            let done = match backup.step(pages)? {
                StepResult::Done => true,
                StepResult::More => false,
                StepResult::Busy | StepResult::Locked => {
                    tracing::debug!(pages, "backup step blocked; backing off");
                    tokio::time::sleep(BUSY_BACKOFF).await;
                    continue;
                }
                other => {
                    return Err(DbError::ExecutionError(format!(
                        "unexpected backup step result {other:?}"
                    )));
                }
            };

            let progress = BackupProgress::from_engine(backup.progress());
            tracing::debug!(
                pages,
                remaining = progress.remaining_pages,
                total = progress.total_pages,
                "backup step"
            );
            let requested = on_progress.as_mut().and_then(|callback| callback(&progress));

            if done {
                tracing::info!(
                    destination = %destination.display(),
                    pages = progress.total_pages,
                    "backup complete"
                );
                return Ok(progress);
            }
            plan.advance(requested)?;
            tokio::task::yield_now().await;
        }
    }

    /// Snapshot a schema into a byte buffer.
    ///
    /// # Errors
    /// Returns `DbError::ConfigError` for an empty or unknown attachment and
    /// `DbError::SqlError` if the engine cannot serialize it.
    pub fn serialize(&self, attachment: &str) -> Result<Vec<u8>, DbError> {
        validate_attachment(attachment)?;
        let raw = self.raw()?;
        ensure_attachment(raw, attachment)?;
        let data = raw.serialize(database_name(attachment))?;
        tracing::debug!(attachment, bytes = data.len(), "serialized database");
        Ok(data.to_vec())
    }

    /// Load a snapshot produced by [`Connection::serialize`] into a new,
    /// disconnected in-memory database.
    ///
    /// The image is spilled to a scratch file and copied in with the backup API.
    ///
    /// # Errors
    /// Returns `DbError::ParameterError` when `bytes` is not a database image,
    /// `DbError::Io` if the scratch file cannot be written and `DbError::SqlError`
    /// if the engine rejects the image.
    pub fn from_serialized(bytes: &[u8]) -> Result<Connection, DbError> {
        if !bytes.starts_with(SQLITE_HEADER) {
            return Err(DbError::ParameterError(
                "buffer is not a SQLite database image".into(),
            ));
        }
        let mut scratch = tempfile::NamedTempFile::new()?;
        scratch.write_all(bytes)?;
        scratch.flush()?;

        let mut conn = Connection::open_in_memory()?;
        let raw = conn.raw.as_mut().ok_or(DbError::ConnectionClosed)?;
        raw.restore(DatabaseName::Main, scratch.path(), None::<fn(Progress)>)?;
        tracing::debug!(bytes = bytes.len(), "loaded serialized database");
        Ok(conn)
    }
}

const SQLITE_HEADER: &[u8] = b"SQLite format 3\0";

fn ensure_attachment(raw: &rusqlite::Connection, attachment: &str) -> Result<(), DbError> {
    if attachment == "main" || attachment == "temp" {
        return Ok(());
    }
    let names = raw
        .prepare("PRAGMA database_list")?
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    if names.iter().any(|name| name.eq_ignore_ascii_case(attachment)) {
        Ok(())
    } else {
        Err(DbError::ConfigError(format!(
            "no attached database named {attachment}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_attachment_is_a_config_error() -> Result<(), DbError> {
        let conn = Connection::open_in_memory()?;
        assert!(matches!(conn.serialize("nope"), Err(DbError::ConfigError(_))));
        Ok(())
    }

    #[test]
    fn serialize_produces_sqlite_image() -> Result<(), DbError> {
        let conn = Connection::open_in_memory()?;
        conn.execute("CREATE TABLE t (v TEXT); INSERT INTO t VALUES ('a');")?;
        let bytes = conn.serialize("main")?;
        assert!(bytes.starts_with(SQLITE_HEADER));
        Ok(())
    }

    #[test]
    fn garbage_is_not_loaded() {
        assert!(matches!(
            Connection::from_serialized(b"not a database"),
            Err(DbError::ParameterError(_))
        ));
    }
}
