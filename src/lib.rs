//! Embedded SQLite storage binding.
//!
//! One owned [`Connection`] per application, statements compiled once and
//! reused, transactions that nest through savepoints, and an async backup that
//! copies the database in bounded steps.
//!
//! ```rust
//! use decopres_db::prelude::*;
//!
//! # fn main() -> Result<(), DbError> {
//! let conn = Connection::open_in_memory()?;
//! conn.execute("CREATE TABLE tasks (id INTEGER PRIMARY KEY, title TEXT NOT NULL)")?;
//! conn.immediate(|c| {
//!     let mut insert = c.prepare("INSERT INTO tasks (title) VALUES (?)")?;
//!     insert.run(vec![Value::from("write docs")])?;
//!     insert.run(vec![Value::from("ship")])?;
//!     Ok::<_, DbError>(())
//! })?;
//! let rows = conn.prepare("SELECT title FROM tasks ORDER BY id")?.all(())?;
//! assert_eq!(rows[1].get::<String>("title")?, "ship");
//! # Ok(())
//! # }
//! ```

pub mod dispatch;
pub mod error;
pub mod prelude;
pub mod results;
pub mod sqlite;
pub mod types;

pub use dispatch::{DatabaseConfig, Dispatcher, Operation, OperationKind, Request, Response};
pub use error::{DbError, DbResult, SqlErrorCode};
pub use results::{ColumnInfo, Row, RowDescriptor, RunResult};
pub use sqlite::{
    BackupOptions, BackupProgress, CheckpointMode, Connection, JournalMode, OpenOptions,
    OpenOptionsBuilder, Params, PreparedStatement, RowCursor, Target, TransactionMode,
};
pub use types::{FromValue, MAX_SAFE_INTEGER, MIN_SAFE_INTEGER, Value, ValueKind};
