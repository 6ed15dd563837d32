//! Persistence capability for Tokenward rows.
//!
//! This module provides:
//! - [`Repository`] - Async trait with typed operations on every row kind
//! - [`Tables`] - The table engine shared by the bundled backends
//! - [`MemoryRepository`] - In-memory backend for tests and the test provider
//! - [`FileRepository`] - JSON file backend, rewritten after every mutation
//! - [`open_repository`] - Helper to pick a backend from an optional path
//!
//! Every operation takes the backend's lock for its own scope only. Operations
//! that must be atomic (secret replacement, token replacement, registering a
//! system with its key and secret, cascading deletes of one row kind) are
//! single repository calls.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{Aco, EncryptionKey, Group, SecretRecord, System, TokenRecord, User};

mod file;
#[cfg(test)]
pub(crate) mod flaky;
mod memory;
mod tables;

pub use file::FileRepository;
pub use memory::MemoryRepository;
pub use tables::{TableBackend, Tables};

/// Error type for repository operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The row to update or delete does not exist.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A unique key is already taken.
    #[error("{entity} already exists: {key}")]
    Duplicate { entity: &'static str, key: String },

    /// I/O error reading or writing the data file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    Backend { message: String },

    /// Configuration directory not available.
    #[error("configuration directory not available")]
    ConfigDirUnavailable,
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, key: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub(crate) fn duplicate(entity: &'static str, key: impl ToString) -> Self {
        StoreError::Duplicate {
            entity,
            key: key.to_string(),
        }
    }
}

/// Typed create/read/update/delete on Tokenward rows.
///
/// Lookups return `Ok(None)` (or an empty vec) when nothing matches; updates
/// and deletes of a missing row return [`StoreError::NotFound`]. Inserts that
/// assign numeric ids ignore the `id` of the row passed in and return the
/// stored row.
#[async_trait]
pub trait Repository: Send + Sync {
    // ACOs

    async fn insert_aco(&self, aco: Aco) -> Result<(), StoreError>;

    async fn get_aco(&self, uuid: Uuid) -> Result<Option<Aco>, StoreError>;

    async fn find_aco_by_client_id(&self, client_id: &str) -> Result<Option<Aco>, StoreError>;

    async fn update_aco(&self, aco: Aco) -> Result<(), StoreError>;

    // Users

    /// Fails with [`StoreError::Duplicate`] when the email is already used.
    async fn insert_user(&self, user: User) -> Result<(), StoreError>;

    async fn get_user(&self, uuid: Uuid) -> Result<Option<User>, StoreError>;

    /// Users of an ACO in creation order.
    async fn users_for_aco(&self, aco_id: Uuid) -> Result<Vec<User>, StoreError>;

    // Tokens

    async fn insert_token(&self, token: TokenRecord) -> Result<(), StoreError>;

    async fn get_token(&self, uuid: Uuid) -> Result<Option<TokenRecord>, StoreError>;

    async fn active_tokens_for_users(
        &self,
        user_ids: &[Uuid],
    ) -> Result<Vec<TokenRecord>, StoreError>;

    /// Mark a token inactive.
    ///
    /// Returns `true` when the row transitioned, `false` when it was already
    /// inactive or does not exist.
    async fn deactivate_token(&self, uuid: Uuid) -> Result<bool, StoreError>;

    /// Deactivate every active token of `user_ids` and insert `token`, under
    /// a single write. Returns the number of tokens deactivated.
    async fn replace_tokens_for_users(
        &self,
        user_ids: &[Uuid],
        token: TokenRecord,
    ) -> Result<usize, StoreError>;

    // Groups

    /// Fails with [`StoreError::Duplicate`] when `group_id` is taken.
    async fn insert_group(&self, group: Group) -> Result<Group, StoreError>;

    async fn get_group(&self, id: u64) -> Result<Option<Group>, StoreError>;

    async fn find_group_by_group_id(&self, group_id: &str) -> Result<Option<Group>, StoreError>;

    async fn list_groups(&self) -> Result<Vec<Group>, StoreError>;

    /// Groups that list `identity` among their users, via the membership index.
    async fn groups_for_member(&self, identity: &str) -> Result<Vec<Group>, StoreError>;

    async fn update_group(&self, group: Group) -> Result<Group, StoreError>;

    async fn delete_group(&self, id: u64) -> Result<(), StoreError>;

    // Systems

    /// Fails with [`StoreError::Duplicate`] when the group already has a system.
    async fn insert_system(&self, system: System) -> Result<System, StoreError>;

    /// Insert a system together with its first public key and secret.
    ///
    /// Either all three rows are stored or none is. The `system_id` of `key`
    /// is ignored.
    async fn insert_system_with_credentials(
        &self,
        system: System,
        key: EncryptionKey,
        secret_hash: String,
    ) -> Result<System, StoreError>;

    async fn get_system(&self, id: u64) -> Result<Option<System>, StoreError>;

    async fn find_system_by_client_id(&self, client_id: &str)
    -> Result<Option<System>, StoreError>;

    async fn systems_for_group(&self, group_id: &str) -> Result<Vec<System>, StoreError>;

    /// Returns the number of rows removed.
    async fn delete_systems(&self, ids: &[u64]) -> Result<usize, StoreError>;

    // Encryption keys

    async fn insert_encryption_key(&self, key: EncryptionKey)
    -> Result<EncryptionKey, StoreError>;

    /// The most recently created key of a system.
    async fn current_encryption_key(
        &self,
        system_id: u64,
    ) -> Result<Option<EncryptionKey>, StoreError>;

    /// Full rotation history, oldest first.
    async fn encryption_keys_for_system(
        &self,
        system_id: u64,
    ) -> Result<Vec<EncryptionKey>, StoreError>;

    async fn delete_encryption_keys(&self, system_ids: &[u64]) -> Result<usize, StoreError>;

    // Secrets

    /// Revoke every current secret of the system and insert a new one, under
    /// a single write.
    async fn replace_secret(&self, system_id: u64, hash: String)
    -> Result<SecretRecord, StoreError>;

    async fn current_secret(&self, system_id: u64) -> Result<Option<SecretRecord>, StoreError>;

    /// Returns the number of secrets that were current and are now revoked.
    async fn revoke_secrets(&self, system_id: u64) -> Result<usize, StoreError>;

    async fn secrets_for_system(&self, system_id: u64) -> Result<Vec<SecretRecord>, StoreError>;

    async fn delete_secrets(&self, system_ids: &[u64]) -> Result<usize, StoreError>;
}

/// Open a repository for the given data file, or an in-memory one.
///
/// The in-memory backend loses everything when the process exits.
pub fn open_repository(path: Option<PathBuf>) -> Result<Arc<dyn Repository>, StoreError> {
    match path {
        Some(path) => {
            tracing::debug!("Using file repository at {}", path.display());
            Ok(Arc::new(FileRepository::load_from_path(path)?))
        }
        None => {
            tracing::warn!("No data file configured; rows will not persist across restarts");
            Ok(Arc::new(MemoryRepository::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_repository_memory_fallback() {
        let repo = open_repository(None).unwrap();
        repo.insert_aco(Aco::new("ACO Corp")).await.unwrap();
        assert!(repo.list_groups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_repository_file_backed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokenward.json");
        let repo = open_repository(Some(path.clone())).unwrap();

        let aco = Aco::new("ACO Corp");
        repo.insert_aco(aco.clone()).await.unwrap();

        assert!(path.exists());
        assert_eq!(repo.get_aco(aco.uuid).await.unwrap().unwrap().name, "ACO Corp");
    }
}
