//! Convenient imports for common functionality.
//!
//! This module re-exports the types most callers need to open a database,
//! run statements and wrap them in transactions.

pub use crate::dispatch::{DatabaseConfig, Dispatcher, Operation, OperationKind, Request};
pub use crate::error::{DbError, DbResult};
pub use crate::results::{Row, RunResult};
pub use crate::sqlite::{
    BackupOptions, BackupProgress, Connection, OpenOptions, Params, PreparedStatement, Target,
    TransactionMode,
};
pub use crate::types::{FromValue, Value};
