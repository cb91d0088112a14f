use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::error::DbError;
use crate::sqlite::prepared::{CompiledStatement, PreparedStatement};
use crate::sqlite::query::descriptor_matches;

use super::Connection;

impl Connection {
    /// Prepare a statement, reusing the compiled form for SQL seen before.
    ///
    /// The engine statement comes from `rusqlite`'s LRU cache; the column
    /// descriptor is shared through this connection's own cache keyed by SQL text.
    ///
    /// # Errors
    /// Returns `DbError::ConnectionClosed` after `close`, or `DbError::SqlError` if the
    /// SQL does not compile.
    pub fn prepare(&self, sql: &str) -> Result<PreparedStatement<'_>, DbError> {
        let raw = self.raw()?;
        let stmt = raw.prepare_cached(sql)?;
        let compiled = self.compiled_for(sql, &stmt);
        Ok(PreparedStatement::new(
            self,
            compiled,
            stmt,
            self.default_safe_integers.get(),
        ))
    }

    /// Distinct SQL texts currently holding a compiled descriptor.
    #[must_use]
    pub fn cached_statement_count(&self) -> usize {
        self.statements.borrow().len()
    }

    /// Total descriptors built since open; unchanged when the cache is hit.
    #[must_use]
    pub fn compiled_statement_count(&self) -> u64 {
        self.compiled_count.get()
    }

    fn compiled_for(&self, sql: &str, stmt: &rusqlite::Statement<'_>) -> Arc<CompiledStatement> {
        let mut cache = self.statements.borrow_mut();
        if let Some(existing) = cache.get(sql) {
            // a schema change can alter the column list under the same text
            if descriptor_matches(existing.columns(), stmt) {
                return existing;
            }
        }
        tracing::trace!(sql, "compile");
        let compiled = Arc::new(CompiledStatement::describe(sql, stmt));
        self.compiled_count.set(self.compiled_count.get() + 1);
        cache.insert(sql, Arc::clone(&compiled), self.options.statement_cache_capacity);
        compiled
    }
}

/// Compiled descriptors keyed by SQL text, evicting the least recently used.
#[derive(Debug, Default)]
pub(crate) struct DescriptorCache {
    entries: HashMap<String, Arc<CompiledStatement>>,
    // front is least recently used
    order: VecDeque<String>,
}

impl DescriptorCache {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn get(&mut self, sql: &str) -> Option<Arc<CompiledStatement>> {
        let found = Arc::clone(self.entries.get(sql)?);
        self.touch(sql);
        Some(found)
    }

    fn insert(&mut self, sql: &str, compiled: Arc<CompiledStatement>, capacity: usize) {
        if self.entries.insert(sql.to_owned(), compiled).is_some() {
            self.touch(sql);
            return;
        }
        self.order.push_back(sql.to_owned());
        while self.entries.len() > capacity {
            let Some(evicted) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&evicted);
        }
    }

    fn touch(&mut self, sql: &str) {
        if let Some(pos) = self.order.iter().position(|key| key == sql) {
            if let Some(key) = self.order.remove(pos) {
                self.order.push_back(key);
            }
        }
    }
}
