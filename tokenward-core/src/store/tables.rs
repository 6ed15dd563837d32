//! The table engine behind the bundled repositories.
//!
//! [`Tables`] holds every row kind plus the id sequences and the group
//! membership index. A backend only decides where the tables live and how a
//! write is made durable; it implements [`TableBackend`] and receives the
//! full [`Repository`] implementation for free.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

use super::{Repository, StoreError};
use crate::model::{Aco, EncryptionKey, Group, SecretRecord, System, TokenRecord, User};

const FORMAT_VERSION: u32 = 1;

/// Last id handed out per numeric table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Sequences {
    groups: u64,
    systems: u64,
    encryption_keys: u64,
    secrets: u64,
}

fn next(counter: &mut u64) -> u64 {
    *counter += 1;
    *counter
}

/// All persisted rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tables {
    /// Version of the storage format (for future migrations).
    version: u32,
    acos: HashMap<Uuid, Aco>,
    /// Kept in insertion order; "first user of an ACO" depends on it.
    users: Vec<User>,
    tokens: HashMap<Uuid, TokenRecord>,
    groups: BTreeMap<u64, Group>,
    systems: BTreeMap<u64, System>,
    encryption_keys: BTreeMap<u64, EncryptionKey>,
    secrets: BTreeMap<u64, SecretRecord>,
    sequences: Sequences,
    /// User identity -> ids of the groups listing it. Rebuilt on load.
    #[serde(skip)]
    members: HashMap<String, BTreeSet<u64>>,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            acos: HashMap::new(),
            users: Vec::new(),
            tokens: HashMap::new(),
            groups: BTreeMap::new(),
            systems: BTreeMap::new(),
            encryption_keys: BTreeMap::new(),
            secrets: BTreeMap::new(),
            sequences: Sequences::default(),
            members: HashMap::new(),
        }
    }
}

impl Tables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Recompute derived indexes after deserialization.
    pub(crate) fn rebuild_indexes(&mut self) {
        self.members.clear();
        let groups: Vec<(u64, Vec<String>)> = self
            .groups
            .values()
            .map(|g| (g.id, g.data.users.clone()))
            .collect();
        for (id, users) in groups {
            self.index_members(id, &users);
        }
    }

    fn index_members(&mut self, group: u64, users: &[String]) {
        for user in users {
            self.members.entry(user.clone()).or_default().insert(group);
        }
    }

    fn unindex_members(&mut self, group: u64, users: &[String]) {
        for user in users {
            if let Some(ids) = self.members.get_mut(user) {
                ids.remove(&group);
                if ids.is_empty() {
                    self.members.remove(user);
                }
            }
        }
    }

    // ACOs

    fn insert_aco(&mut self, aco: Aco) -> Result<(), StoreError> {
        if self.acos.contains_key(&aco.uuid) {
            return Err(StoreError::duplicate("aco", aco.uuid));
        }
        self.acos.insert(aco.uuid, aco);
        Ok(())
    }

    fn find_aco_by_client_id(&self, client_id: &str) -> Option<Aco> {
        self.acos
            .values()
            .find(|a| a.client_id.as_deref() == Some(client_id))
            .cloned()
    }

    fn update_aco(&mut self, aco: Aco) -> Result<(), StoreError> {
        let slot = self
            .acos
            .get_mut(&aco.uuid)
            .ok_or_else(|| StoreError::not_found("aco", aco.uuid))?;
        *slot = aco;
        Ok(())
    }

    // Users

    fn insert_user(&mut self, user: User) -> Result<(), StoreError> {
        if self
            .users
            .iter()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(StoreError::duplicate("user", &user.email));
        }
        if self.users.iter().any(|u| u.uuid == user.uuid) {
            return Err(StoreError::duplicate("user", user.uuid));
        }
        self.users.push(user);
        Ok(())
    }

    fn users_for_aco(&self, aco_id: Uuid) -> Vec<User> {
        self.users
            .iter()
            .filter(|u| u.aco_id == aco_id)
            .cloned()
            .collect()
    }

    // Tokens

    fn insert_token(&mut self, token: TokenRecord) -> Result<(), StoreError> {
        if self.tokens.contains_key(&token.uuid) {
            return Err(StoreError::duplicate("token", token.uuid));
        }
        self.tokens.insert(token.uuid, token);
        Ok(())
    }

    fn active_tokens_for_users(&self, user_ids: &[Uuid]) -> Vec<TokenRecord> {
        let mut tokens: Vec<TokenRecord> = self
            .tokens
            .values()
            .filter(|t| t.active && user_ids.contains(&t.user_id))
            .cloned()
            .collect();
        tokens.sort_by_key(|t| (t.issued_at, t.uuid));
        tokens
    }

    fn deactivate_token(&mut self, uuid: Uuid) -> bool {
        match self.tokens.get_mut(&uuid) {
            Some(token) if token.active => {
                token.active = false;
                true
            }
            _ => false,
        }
    }

    fn replace_tokens_for_users(
        &mut self,
        user_ids: &[Uuid],
        token: TokenRecord,
    ) -> Result<usize, StoreError> {
        if self.tokens.contains_key(&token.uuid) {
            return Err(StoreError::duplicate("token", token.uuid));
        }
        let mut deactivated = 0;
        for existing in self.tokens.values_mut() {
            if existing.active && user_ids.contains(&existing.user_id) {
                existing.active = false;
                deactivated += 1;
            }
        }
        self.tokens.insert(token.uuid, token);
        Ok(deactivated)
    }

    // Groups

    fn insert_group(&mut self, mut group: Group) -> Result<Group, StoreError> {
        if self.groups.values().any(|g| g.group_id == group.group_id) {
            return Err(StoreError::duplicate("group", &group.group_id));
        }
        group.id = next(&mut self.sequences.groups);
        self.index_members(group.id, &group.data.users);
        self.groups.insert(group.id, group.clone());
        Ok(group)
    }

    fn find_group_by_group_id(&self, group_id: &str) -> Option<Group> {
        self.groups
            .values()
            .find(|g| g.group_id == group_id)
            .cloned()
    }

    fn groups_for_member(&self, identity: &str) -> Vec<Group> {
        self.members
            .get(identity)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.groups.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn update_group(&mut self, mut group: Group) -> Result<Group, StoreError> {
        let existing = self
            .groups
            .get(&group.id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("group", group.id))?;
        // group_id is immutable
        group.group_id = existing.group_id;
        group.created_at = existing.created_at;
        self.unindex_members(group.id, &existing.data.users);
        self.index_members(group.id, &group.data.users);
        self.groups.insert(group.id, group.clone());
        Ok(group)
    }

    fn delete_group(&mut self, id: u64) -> Result<(), StoreError> {
        let group = self
            .groups
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("group", id))?;
        self.unindex_members(id, &group.data.users);
        Ok(())
    }

    // Systems

    fn insert_system(&mut self, mut system: System) -> Result<System, StoreError> {
        if self.systems.values().any(|s| s.group_id == system.group_id) {
            return Err(StoreError::duplicate("system for group", &system.group_id));
        }
        if self.systems.values().any(|s| s.client_id == system.client_id) {
            return Err(StoreError::duplicate("system", &system.client_id));
        }
        system.id = next(&mut self.sequences.systems);
        self.systems.insert(system.id, system.clone());
        Ok(system)
    }

    /// Only the system insert can fail; nothing is written when it does.
    fn insert_system_with_credentials(
        &mut self,
        system: System,
        mut key: EncryptionKey,
        secret_hash: String,
    ) -> Result<System, StoreError> {
        let system = self.insert_system(system)?;
        key.system_id = system.id;
        key.id = next(&mut self.sequences.encryption_keys);
        self.encryption_keys.insert(key.id, key);
        self.replace_secret(system.id, secret_hash)?;
        Ok(system)
    }

    fn find_system_by_client_id(&self, client_id: &str) -> Option<System> {
        self.systems
            .values()
            .find(|s| s.client_id == client_id)
            .cloned()
    }

    fn systems_for_group(&self, group_id: &str) -> Vec<System> {
        self.systems
            .values()
            .filter(|s| s.group_id == group_id)
            .cloned()
            .collect()
    }

    fn delete_systems(&mut self, ids: &[u64]) -> usize {
        let before = self.systems.len();
        self.systems.retain(|id, _| !ids.contains(id));
        before - self.systems.len()
    }

    // Encryption keys

    fn insert_encryption_key(&mut self, mut key: EncryptionKey) -> Result<EncryptionKey, StoreError> {
        if !self.systems.contains_key(&key.system_id) {
            return Err(StoreError::not_found("system", key.system_id));
        }
        key.id = next(&mut self.sequences.encryption_keys);
        self.encryption_keys.insert(key.id, key.clone());
        Ok(key)
    }

    fn encryption_keys_for_system(&self, system_id: u64) -> Vec<EncryptionKey> {
        self.encryption_keys
            .values()
            .filter(|k| k.system_id == system_id)
            .cloned()
            .collect()
    }

    fn delete_encryption_keys(&mut self, system_ids: &[u64]) -> usize {
        let before = self.encryption_keys.len();
        self.encryption_keys
            .retain(|_, k| !system_ids.contains(&k.system_id));
        before - self.encryption_keys.len()
    }

    // Secrets

    fn replace_secret(&mut self, system_id: u64, hash: String) -> Result<SecretRecord, StoreError> {
        if !self.systems.contains_key(&system_id) {
            return Err(StoreError::not_found("system", system_id));
        }
        let now = Utc::now();
        self.revoke_secrets(system_id);
        let record = SecretRecord {
            id: next(&mut self.sequences.secrets),
            system_id,
            hash,
            created_at: now,
            revoked_at: None,
        };
        self.secrets.insert(record.id, record.clone());
        Ok(record)
    }

    fn current_secret(&self, system_id: u64) -> Option<SecretRecord> {
        self.secrets
            .values()
            .rev()
            .find(|s| s.system_id == system_id && s.is_current())
            .cloned()
    }

    fn revoke_secrets(&mut self, system_id: u64) -> usize {
        let now = Utc::now();
        let mut revoked = 0;
        for secret in self.secrets.values_mut() {
            if secret.system_id == system_id && secret.is_current() {
                secret.revoked_at = Some(now);
                revoked += 1;
            }
        }
        revoked
    }

    fn secrets_for_system(&self, system_id: u64) -> Vec<SecretRecord> {
        self.secrets
            .values()
            .filter(|s| s.system_id == system_id)
            .cloned()
            .collect()
    }

    fn delete_secrets(&mut self, system_ids: &[u64]) -> usize {
        let before = self.secrets.len();
        self.secrets.retain(|_, s| !system_ids.contains(&s.system_id));
        before - self.secrets.len()
    }
}

/// Storage of a [`Tables`] value.
///
/// `write` must apply the closure atomically: if it fails, or the backend
/// cannot persist the result, no change may remain visible.
pub trait TableBackend: Send + Sync {
    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R, StoreError>;

    fn write<R>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<R, StoreError>,
    ) -> Result<R, StoreError>;
}

#[async_trait]
impl<B: TableBackend> Repository for B {
    async fn insert_aco(&self, aco: Aco) -> Result<(), StoreError> {
        self.write(|t| t.insert_aco(aco))
    }

    async fn get_aco(&self, uuid: Uuid) -> Result<Option<Aco>, StoreError> {
        self.read(|t| t.acos.get(&uuid).cloned())
    }

    async fn find_aco_by_client_id(&self, client_id: &str) -> Result<Option<Aco>, StoreError> {
        self.read(|t| t.find_aco_by_client_id(client_id))
    }

    async fn update_aco(&self, aco: Aco) -> Result<(), StoreError> {
        self.write(|t| t.update_aco(aco))
    }

    async fn insert_user(&self, user: User) -> Result<(), StoreError> {
        self.write(|t| t.insert_user(user))
    }

    async fn get_user(&self, uuid: Uuid) -> Result<Option<User>, StoreError> {
        self.read(|t| t.users.iter().find(|u| u.uuid == uuid).cloned())
    }

    async fn users_for_aco(&self, aco_id: Uuid) -> Result<Vec<User>, StoreError> {
        self.read(|t| t.users_for_aco(aco_id))
    }

    async fn insert_token(&self, token: TokenRecord) -> Result<(), StoreError> {
        self.write(|t| t.insert_token(token))
    }

    async fn get_token(&self, uuid: Uuid) -> Result<Option<TokenRecord>, StoreError> {
        self.read(|t| t.tokens.get(&uuid).cloned())
    }

    async fn active_tokens_for_users(
        &self,
        user_ids: &[Uuid],
    ) -> Result<Vec<TokenRecord>, StoreError> {
        self.read(|t| t.active_tokens_for_users(user_ids))
    }

    async fn deactivate_token(&self, uuid: Uuid) -> Result<bool, StoreError> {
        self.write(|t| Ok(t.deactivate_token(uuid)))
    }

    async fn replace_tokens_for_users(
        &self,
        user_ids: &[Uuid],
        token: TokenRecord,
    ) -> Result<usize, StoreError> {
        self.write(|t| t.replace_tokens_for_users(user_ids, token))
    }

    async fn insert_group(&self, group: Group) -> Result<Group, StoreError> {
        self.write(|t| t.insert_group(group))
    }

    async fn get_group(&self, id: u64) -> Result<Option<Group>, StoreError> {
        self.read(|t| t.groups.get(&id).cloned())
    }

    async fn find_group_by_group_id(&self, group_id: &str) -> Result<Option<Group>, StoreError> {
        self.read(|t| t.find_group_by_group_id(group_id))
    }

    async fn list_groups(&self) -> Result<Vec<Group>, StoreError> {
        self.read(|t| t.groups.values().cloned().collect())
    }

    async fn groups_for_member(&self, identity: &str) -> Result<Vec<Group>, StoreError> {
        self.read(|t| t.groups_for_member(identity))
    }

    async fn update_group(&self, group: Group) -> Result<Group, StoreError> {
        self.write(|t| t.update_group(group))
    }

    async fn delete_group(&self, id: u64) -> Result<(), StoreError> {
        self.write(|t| t.delete_group(id))
    }

    async fn insert_system(&self, system: System) -> Result<System, StoreError> {
        self.write(|t| t.insert_system(system))
    }

    async fn insert_system_with_credentials(
        &self,
        system: System,
        key: EncryptionKey,
        secret_hash: String,
    ) -> Result<System, StoreError> {
        self.write(|t| t.insert_system_with_credentials(system, key, secret_hash))
    }

    async fn get_system(&self, id: u64) -> Result<Option<System>, StoreError> {
        self.read(|t| t.systems.get(&id).cloned())
    }

    async fn find_system_by_client_id(
        &self,
        client_id: &str,
    ) -> Result<Option<System>, StoreError> {
        self.read(|t| t.find_system_by_client_id(client_id))
    }

    async fn systems_for_group(&self, group_id: &str) -> Result<Vec<System>, StoreError> {
        self.read(|t| t.systems_for_group(group_id))
    }

    async fn delete_systems(&self, ids: &[u64]) -> Result<usize, StoreError> {
        self.write(|t| Ok(t.delete_systems(ids)))
    }

    async fn insert_encryption_key(
        &self,
        key: EncryptionKey,
    ) -> Result<EncryptionKey, StoreError> {
        self.write(|t| t.insert_encryption_key(key))
    }

    async fn current_encryption_key(
        &self,
        system_id: u64,
    ) -> Result<Option<EncryptionKey>, StoreError> {
        self.read(|t| t.encryption_keys_for_system(system_id).pop())
    }

    async fn encryption_keys_for_system(
        &self,
        system_id: u64,
    ) -> Result<Vec<EncryptionKey>, StoreError> {
        self.read(|t| t.encryption_keys_for_system(system_id))
    }

    async fn delete_encryption_keys(&self, system_ids: &[u64]) -> Result<usize, StoreError> {
        self.write(|t| Ok(t.delete_encryption_keys(system_ids)))
    }

    async fn replace_secret(
        &self,
        system_id: u64,
        hash: String,
    ) -> Result<SecretRecord, StoreError> {
        self.write(|t| t.replace_secret(system_id, hash))
    }

    async fn current_secret(&self, system_id: u64) -> Result<Option<SecretRecord>, StoreError> {
        self.read(|t| t.current_secret(system_id))
    }

    async fn revoke_secrets(&self, system_id: u64) -> Result<usize, StoreError> {
        self.write(|t| Ok(t.revoke_secrets(system_id)))
    }

    async fn secrets_for_system(&self, system_id: u64) -> Result<Vec<SecretRecord>, StoreError> {
        self.read(|t| t.secrets_for_system(system_id))
    }

    async fn delete_secrets(&self, system_ids: &[u64]) -> Result<usize, StoreError> {
        self.write(|t| Ok(t.delete_secrets(system_ids)))
    }
}
