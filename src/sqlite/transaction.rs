use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Locking behaviour of the outermost `BEGIN`.
///
/// Nested scopes always use savepoints, so the mode only matters at depth 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    #[default]
    Deferred,
    Immediate,
    Exclusive,
}

impl TransactionMode {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            TransactionMode::Deferred => "DEFERRED",
            TransactionMode::Immediate => "IMMEDIATE",
            TransactionMode::Exclusive => "EXCLUSIVE",
        }
    }
}

/// Bracketing chosen for one wrapped call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TxScope {
    /// No transaction was active: `BEGIN` / `COMMIT` / `ROLLBACK`.
    Root(TransactionMode),
    /// Nested inside an open transaction: `SAVEPOINT` / `RELEASE` / `ROLLBACK TO`.
    Savepoint(String),
}

impl TxScope {
    pub(crate) fn enter(in_transaction: bool, depth: u32, mode: TransactionMode) -> Self {
        if in_transaction {
            TxScope::Savepoint(savepoint_name(depth))
        } else {
            TxScope::Root(mode)
        }
    }

    pub(crate) fn begin(&self) -> ControlStatement<'_> {
        match self {
            TxScope::Root(mode) => ControlStatement::Begin(*mode),
            TxScope::Savepoint(name) => ControlStatement::Savepoint(name),
        }
    }

    pub(crate) fn finish(&self) -> ControlStatement<'_> {
        match self {
            TxScope::Root(_) => ControlStatement::Commit,
            TxScope::Savepoint(name) => ControlStatement::Release(name),
        }
    }
}

pub(crate) fn savepoint_name(depth: u32) -> String {
    format!("decopres_sp_{depth}")
}

/// One transaction-control statement issued by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlStatement<'a> {
    Begin(TransactionMode),
    Commit,
    Rollback,
    Savepoint(&'a str),
    Release(&'a str),
    RollbackTo(&'a str),
}

impl ControlStatement<'_> {
    pub(crate) fn is_rollback(&self) -> bool {
        matches!(self, ControlStatement::Rollback | ControlStatement::RollbackTo(_))
    }
}

impl fmt::Display for ControlStatement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlStatement::Begin(mode) => write!(f, "BEGIN {}", mode.as_sql()),
            ControlStatement::Commit => f.write_str("COMMIT"),
            ControlStatement::Rollback => f.write_str("ROLLBACK"),
            ControlStatement::Savepoint(name) => write!(f, "SAVEPOINT \"{name}\""),
            ControlStatement::Release(name) => write!(f, "RELEASE \"{name}\""),
            ControlStatement::RollbackTo(name) => write!(f, "ROLLBACK TO \"{name}\""),
        }
    }
}

/// Running totals of control statements a connection has issued successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TransactionStats {
    pub begins: u64,
    pub commits: u64,
    pub rollbacks: u64,
    pub savepoints: u64,
    pub releases: u64,
    pub rollbacks_to: u64,
}

impl TransactionStats {
    pub(crate) fn record(&mut self, stmt: ControlStatement<'_>) {
        match stmt {
            ControlStatement::Begin(_) => self.begins += 1,
            ControlStatement::Commit => self.commits += 1,
            ControlStatement::Rollback => self.rollbacks += 1,
            ControlStatement::Savepoint(_) => self.savepoints += 1,
            ControlStatement::Release(_) => self.releases += 1,
            ControlStatement::RollbackTo(_) => self.rollbacks_to += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_scope_uses_begin_and_commit() {
        let scope = TxScope::enter(false, 0, TransactionMode::Immediate);
        assert_eq!(scope.begin().to_string(), "BEGIN IMMEDIATE");
        assert_eq!(scope.finish().to_string(), "COMMIT");
    }

    #[test]
    fn nested_scope_ignores_mode() {
        let scope = TxScope::enter(true, 2, TransactionMode::Exclusive);
        assert_eq!(scope.begin().to_string(), "SAVEPOINT \"decopres_sp_2\"");
        assert_eq!(scope.finish().to_string(), "RELEASE \"decopres_sp_2\"");
    }

    #[test]
    fn stats_count_each_kind() {
        let mut stats = TransactionStats::default();
        stats.record(ControlStatement::Begin(TransactionMode::Deferred));
        stats.record(ControlStatement::Savepoint("s"));
        stats.record(ControlStatement::RollbackTo("s"));
        stats.record(ControlStatement::Release("s"));
        stats.record(ControlStatement::Commit);
        assert_eq!(
            stats,
            TransactionStats {
                begins: 1,
                commits: 1,
                rollbacks: 0,
                savepoints: 1,
                releases: 1,
                rollbacks_to: 1,
            }
        );
    }
}
