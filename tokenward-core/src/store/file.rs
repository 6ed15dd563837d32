//! JSON file repository.
//!
//! # Storage Location
//!
//! By default rows are stored at `~/.local/share/tokenward/tokenward.json` on
//! Linux, the Application Support directory on macOS and `%APPDATA%` on
//! Windows. The whole file is rewritten after every mutation.

use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};

use super::{StoreError, TableBackend, Tables};

/// Disk-backed repository.
///
/// A mutation is applied to a copy of the tables, the copy is written to
/// disk, and only then does it replace the in-memory state. A failed write
/// leaves both the file and the in-memory rows unchanged.
pub struct FileRepository {
    /// Path to the JSON data file.
    path: PathBuf,

    /// In-memory copy of the file contents.
    tables: RwLock<Tables>,
}

impl FileRepository {
    /// Get the default data file path.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let dirs = directories::ProjectDirs::from("dev", "tokenward", "tokenward")
            .ok_or(StoreError::ConfigDirUnavailable)?;

        Ok(dirs.data_dir().join("tokenward.json"))
    }

    /// Load the repository from the default location.
    pub fn load() -> Result<Self, StoreError> {
        Self::load_from_path(Self::default_path()?)
    }

    /// Load the repository from a specific path.
    ///
    /// Creates parent directories if they don't exist. A missing file starts
    /// an empty repository; the file is created on the first write.
    pub fn load_from_path(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut tables = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str::<Tables>(&contents)?
        } else {
            Tables::new()
        };
        tables.rebuild_indexes();

        tracing::debug!("Loaded repository from {}", path.display());

        Ok(Self {
            path,
            tables: RwLock::new(tables),
        })
    }

    /// Get the storage path for this repository.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, tables: &Tables) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(tables)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, contents)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

impl std::fmt::Debug for FileRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRepository")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl TableBackend for FileRepository {
    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R, StoreError> {
        let tables = self.tables.read();
        Ok(f(&tables))
    }

    fn write<R>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut tables = self.tables.write();
        let mut staged = tables.clone();
        let result = f(&mut staged)?;
        self.save(&staged)?;
        *tables = staged;
        Ok(result)
    }
}
