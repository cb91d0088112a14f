use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::DbError;

/// Reserved path value meaning "temporary in-memory database".
pub const MEMORY_MARKER: &str = ":memory:";

/// Largest busy timeout accepted, in milliseconds (2^31 - 1).
pub const MAX_TIMEOUT_MS: u64 = i32::MAX as u64;

const DEFAULT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 128;

/// Where a connection's data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    File(PathBuf),
    Memory,
}

impl Target {
    /// Interpret a user-supplied path; `":memory:"` and `""` select an in-memory database.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        if path.is_empty() || path == MEMORY_MARKER {
            Target::Memory
        } else {
            Target::File(PathBuf::from(path))
        }
    }

    #[must_use]
    pub fn is_memory(&self) -> bool {
        matches!(self, Target::Memory)
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Target::File(p) => Some(p),
            Target::Memory => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::File(p) => write!(f, "{}", p.display()),
            Target::Memory => f.write_str(MEMORY_MARKER),
        }
    }
}

impl From<&str> for Target {
    fn from(value: &str) -> Self {
        Target::parse(value)
    }
}

impl From<PathBuf> for Target {
    fn from(value: PathBuf) -> Self {
        match value.to_str() {
            Some(s) => Target::parse(s),
            None => Target::File(value),
        }
    }
}

impl From<&Path> for Target {
    fn from(value: &Path) -> Self {
        Target::from(value.to_path_buf())
    }
}

/// `PRAGMA journal_mode` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Memory,
    Wal,
    Off,
}

impl JournalMode {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            JournalMode::Delete => "DELETE",
            JournalMode::Truncate => "TRUNCATE",
            JournalMode::Persist => "PERSIST",
            JournalMode::Memory => "MEMORY",
            JournalMode::Wal => "WAL",
            JournalMode::Off => "OFF",
        }
    }
}

/// `PRAGMA wal_checkpoint(...)` modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointMode {
    #[default]
    Passive,
    Full,
    Restart,
    Truncate,
}

impl CheckpointMode {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            CheckpointMode::Passive => "PASSIVE",
            CheckpointMode::Full => "FULL",
            CheckpointMode::Restart => "RESTART",
            CheckpointMode::Truncate => "TRUNCATE",
        }
    }
}

/// Options for opening a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OpenOptions {
    pub readonly: bool,
    pub file_must_exist: bool,
    pub timeout_ms: u64,
    /// Default for newly prepared statements; see [`crate::sqlite::PreparedStatement::safe_integers`].
    pub safe_integers: bool,
    pub statement_cache_capacity: usize,
    pub journal_mode: Option<JournalMode>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            readonly: false,
            file_must_exist: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            safe_integers: false,
            statement_cache_capacity: DEFAULT_STATEMENT_CACHE_CAPACITY,
            journal_mode: None,
        }
    }
}

impl OpenOptions {
    #[must_use]
    pub fn builder() -> OpenOptionsBuilder {
        OpenOptionsBuilder::new()
    }

    /// Check the options against the target before anything touches the filesystem.
    ///
    /// # Errors
    /// Returns `DbError::ConfigError` for readonly in-memory targets, out-of-range timeouts,
    /// a missing parent directory, or a missing file when `file_must_exist` is set.
    pub fn validate(&self, target: &Target) -> Result<(), DbError> {
        if self.timeout_ms > MAX_TIMEOUT_MS {
            return Err(DbError::ConfigError(format!(
                "timeout_ms must be between 0 and {MAX_TIMEOUT_MS}, got {}",
                self.timeout_ms
            )));
        }
        if self.statement_cache_capacity == 0 {
            return Err(DbError::ConfigError(
                "statement_cache_capacity must be at least 1".into(),
            ));
        }
        match target {
            Target::Memory => {
                if self.readonly {
                    return Err(DbError::ConfigError(
                        "in-memory/temporary databases cannot be readonly".into(),
                    ));
                }
                if self.file_must_exist {
                    return Err(DbError::ConfigError(
                        "file_must_exist does not apply to in-memory databases".into(),
                    ));
                }
            }
            Target::File(path) => {
                if let Some(parent) = parent_dir(path)
                    && !parent.is_dir()
                {
                    return Err(DbError::ConfigError(format!(
                        "cannot open database because the directory does not exist: {}",
                        parent.display()
                    )));
                }
                if (self.file_must_exist || self.readonly) && !path.exists() {
                    return Err(DbError::ConfigError(format!(
                        "database file does not exist: {}",
                        path.display()
                    )));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn open_flags(&self) -> rusqlite::OpenFlags {
        use rusqlite::OpenFlags;
        let mut flags = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.readonly {
            flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
        } else {
            flags |= OpenFlags::SQLITE_OPEN_READ_WRITE;
            if !self.file_must_exist {
                flags |= OpenFlags::SQLITE_OPEN_CREATE;
            }
        }
        flags
    }
}

/// Parent directory of a path, treating a bare file name as "current directory".
pub(crate) fn parent_dir(path: &Path) -> Option<&Path> {
    match path.parent() {
        Some(p) if p.as_os_str().is_empty() => None,
        other => other,
    }
}

/// Fluent builder for [`OpenOptions`].
#[derive(Debug, Clone, Default)]
pub struct OpenOptionsBuilder {
    opts: OpenOptions,
}

impl OpenOptionsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.opts.readonly = readonly;
        self
    }

    #[must_use]
    pub fn file_must_exist(mut self, must_exist: bool) -> Self {
        self.opts.file_must_exist = must_exist;
        self
    }

    #[must_use]
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.opts.timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub fn safe_integers(mut self, safe: bool) -> Self {
        self.opts.safe_integers = safe;
        self
    }

    #[must_use]
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.opts.statement_cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn journal_mode(mut self, mode: JournalMode) -> Self {
        self.opts.journal_mode = Some(mode);
        self
    }

    #[must_use]
    pub fn finish(self) -> OpenOptions {
        self.opts
    }
}
