// SQLite binding, split into:
// - config: open targets, options and pragma modes
// - connection: the owned handle plus exec/prepare/transaction/backup surfaces
// - prepared: compiled statements, statement handles and row cursors
// - params: parameter binding
// - query: row decoding and the integer policy
// - transaction: scope bracketing and control-statement bookkeeping
// - backup: stepped backup options and progress

pub mod backup;
pub mod config;
pub mod connection;
pub mod params;
pub mod prepared;
pub(crate) mod query;
pub mod transaction;

pub use backup::{BackupOptions, BackupProgress};
pub use config::{CheckpointMode, JournalMode, OpenOptions, OpenOptionsBuilder, Target};
pub use connection::{CheckpointResult, Connection};
pub use params::Params;
pub use prepared::{CompiledStatement, PreparedStatement, RowCursor};
pub use transaction::{TransactionMode, TransactionStats};
