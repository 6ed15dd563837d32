//! In-memory repository implementation.

use parking_lot::RwLock;

use super::{StoreError, TableBackend, Tables};

/// In-memory repository for testing and the test provider.
///
/// This repository is not persistent; data is lost when the process exits.
///
/// # Thread Safety
///
/// Rows live behind a `parking_lot::RwLock`; each operation holds the guard
/// only for its own scope.
pub struct MemoryRepository {
    tables: RwLock<Tables>,
}

impl MemoryRepository {
    /// Create a new empty repository.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::new()),
        }
    }

    /// Create a repository over existing tables.
    pub fn with_tables(mut tables: Tables) -> Self {
        tables.rebuild_indexes();
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Copy of the current tables.
    pub fn snapshot(&self) -> Tables {
        self.tables.read().clone()
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRepository").finish_non_exhaustive()
    }
}

impl TableBackend for MemoryRepository {
    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R, StoreError> {
        let tables = self.tables.read();
        Ok(f(&tables))
    }

    fn write<R>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut tables = self.tables.write();
        f(&mut tables)
    }
}
