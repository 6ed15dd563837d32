//! Memory backend whose writes start failing after a set number.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::{MemoryRepository, StoreError, TableBackend, Tables};

pub(crate) struct FlakyBackend {
    inner: MemoryRepository,
    writes_left: AtomicUsize,
}

impl FlakyBackend {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryRepository::new(),
            writes_left: AtomicUsize::new(usize::MAX),
        }
    }

    /// Allow `writes` more writes, then fail every one after.
    pub(crate) fn fail_after(&self, writes: usize) {
        self.writes_left.store(writes, Ordering::SeqCst);
    }
}

impl TableBackend for FlakyBackend {
    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R, StoreError> {
        self.inner.read(f)
    }

    fn write<R>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let left = self.writes_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(StoreError::Backend {
                message: "disk unavailable".to_string(),
            });
        }
        if left != usize::MAX {
            self.writes_left.store(left - 1, Ordering::SeqCst);
        }
        self.inner.write(f)
    }
}
