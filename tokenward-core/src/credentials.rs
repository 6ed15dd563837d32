//! Credential store: groups, their systems, and each system's secrets and
//! public keys.
//!
//! A group owns at most one system. A system owns a rotation history of
//! public keys (the newest is current) and a history of client secrets (at
//! most one is current). Deleting a group removes all of it, children first.

use chrono::Utc;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AuthError, CascadeStep, Problems};
use crate::model::{EncryptionKey, Group, GroupData, System, SystemCredentials, SystemPublicKey};
use crate::secret::{Secret, generate_client_secret, hash_secret, verify_secret};
use crate::store::{Repository, StoreError};

/// Smallest accepted RSA modulus, in bits.
pub const MIN_PUBLIC_KEY_BITS: usize = 2048;

/// Request to create the system of a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSystem {
    pub group_id: String,
    pub client_name: String,
    pub scope: String,
    pub public_key: String,
    pub tracking_id: String,
}

impl RegisterSystem {
    pub fn validate(&self) -> Result<(), AuthError> {
        let mut problems = Problems::new();
        problems
            .require(&self.group_id, "group_id")
            .require(&self.client_name, "client_name")
            .require(&self.scope, "scope")
            .require(&self.public_key, "public_key")
            .require(&self.tracking_id, "tracking_id");
        problems.finish()
    }
}

/// Parse PEM text as an RSA public key (SPKI or PKCS#1).
pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey, AuthError> {
    let pem = pem.trim();
    if pem.is_empty() {
        return Err(AuthError::InvalidKey {
            reason: "public key is empty".to_string(),
        });
    }

    let key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| AuthError::InvalidKey {
            reason: e.to_string(),
        })?;

    let bits = key.size() * 8;
    if bits < MIN_PUBLIC_KEY_BITS {
        return Err(AuthError::InvalidKey {
            reason: format!("key is {bits} bits; at least {MIN_PUBLIC_KEY_BITS} required"),
        });
    }
    Ok(key)
}

/// Undo one level of string quoting, leaving anything else untouched.
fn unquote_once(xdata: &str) -> String {
    let trimmed = xdata.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        if let Ok(inner) = serde_json::from_str::<String>(trimmed) {
            return inner;
        }
    }
    xdata.to_string()
}

fn cascade(step: CascadeStep) -> impl FnOnce(StoreError) -> AuthError {
    move |source| AuthError::CascadeFailed { step, source }
}

/// Group and system credential management.
#[derive(Clone)]
pub struct CredentialStore {
    repo: Arc<dyn Repository>,
}

impl CredentialStore {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Register a group.
    ///
    /// A quoted `xdata` string is unescaped once before it is stored.
    pub async fn create_group(&self, mut data: GroupData) -> Result<Group, AuthError> {
        if data.group_id.trim().is_empty() {
            return Err(AuthError::invalid("group_id cannot be blank"));
        }
        data.group_id = data.group_id.trim().to_string();
        data.xdata = unquote_once(&data.xdata);

        let now = Utc::now();
        let group = self
            .repo
            .insert_group(Group {
                id: 0,
                group_id: data.group_id.clone(),
                data,
                created_at: now,
                updated_at: now,
            })
            .await?;

        tracing::info!(group = group.id, "Created group {}", group.group_id);
        Ok(group)
    }

    /// Replace a group's document, keeping its `group_id` and name.
    pub async fn update_group(&self, id: u64, mut data: GroupData) -> Result<Group, AuthError> {
        let mut group = self.get_group(id).await?;

        data.group_id = group.data.group_id.clone();
        data.name = group.data.name.clone();
        data.xdata = unquote_once(&data.xdata);
        group.data = data;
        group.updated_at = Utc::now();

        let group = self.repo.update_group(group).await?;
        tracing::info!(group = group.id, "Updated group {}", group.group_id);
        Ok(group)
    }

    pub async fn get_group(&self, id: u64) -> Result<Group, AuthError> {
        self.repo
            .get_group(id)
            .await?
            .ok_or_else(|| AuthError::not_found("group", id))
    }

    pub async fn get_group_by_group_id(&self, group_id: &str) -> Result<Group, AuthError> {
        self.repo
            .find_group_by_group_id(group_id)
            .await?
            .ok_or_else(|| AuthError::not_found("group", group_id))
    }

    pub async fn list_groups(&self) -> Result<Vec<Group>, AuthError> {
        Ok(self.repo.list_groups().await?)
    }

    /// The `group_id`s of every group listing `identity` among its users.
    pub async fn authorized_groups_for(&self, identity: &str) -> Result<Vec<String>, AuthError> {
        let groups = self.repo.groups_for_member(identity).await?;
        Ok(groups.into_iter().map(|g| g.group_id).collect())
    }

    /// Delete a group with its systems, secrets and encryption keys.
    ///
    /// Children go first. The first failing step aborts the deletion and is
    /// reported; later steps are not attempted.
    pub async fn delete_group(&self, id: u64) -> Result<(), AuthError> {
        let group = self.get_group(id).await?;

        let system_ids: Vec<u64> = self
            .repo
            .systems_for_group(&group.group_id)
            .await
            .map_err(cascade(CascadeStep::FindSystems))?
            .into_iter()
            .map(|s| s.id)
            .collect();

        let keys = self
            .repo
            .delete_encryption_keys(&system_ids)
            .await
            .map_err(cascade(CascadeStep::DeleteEncryptionKeys))?;
        let secrets = self
            .repo
            .delete_secrets(&system_ids)
            .await
            .map_err(cascade(CascadeStep::DeleteSecrets))?;
        self.repo
            .delete_systems(&system_ids)
            .await
            .map_err(cascade(CascadeStep::DeleteSystems))?;
        self.repo
            .delete_group(id)
            .await
            .map_err(cascade(CascadeStep::DeleteGroup))?;

        tracing::info!(
            group = id,
            systems = system_ids.len(),
            keys,
            secrets,
            "Deleted group {}",
            group.group_id
        );
        Ok(())
    }

    /// Create the system of a group with its first public key and secret.
    ///
    /// The plaintext secret in the returned credentials is not stored and
    /// cannot be retrieved again.
    pub async fn register_system(&self, request: RegisterSystem) -> Result<SystemCredentials, AuthError> {
        request.validate()?;
        parse_public_key(&request.public_key)?;

        let group = self.get_group_by_group_id(request.group_id.trim()).await?;
        let software_id = group
            .data
            .system
            .as_ref()
            .map(|s| s.software_id.clone())
            .unwrap_or_default();

        let secret = generate_client_secret();
        let system = self
            .repo
            .insert_system_with_credentials(
                System {
                    id: 0,
                    group_id: group.group_id.clone(),
                    client_id: Uuid::new_v4().to_string(),
                    client_name: request.client_name.trim().to_string(),
                    software_id,
                    api_scope: request.scope.trim().to_string(),
                    created_at: Utc::now(),
                },
                EncryptionKey {
                    id: 0,
                    system_id: 0,
                    body: request.public_key.trim().to_string(),
                    created_at: Utc::now(),
                },
                hash_secret(&secret),
            )
            .await?;

        tracing::info!(
            system = system.id,
            tracking_id = %request.tracking_id,
            "Registered system {} for group {}",
            system.client_id,
            group.group_id
        );

        Ok(credentials_for(&system, secret))
    }

    pub async fn get_system(&self, system_id: u64) -> Result<System, AuthError> {
        self.repo
            .get_system(system_id)
            .await?
            .ok_or_else(|| AuthError::not_found("system", system_id))
    }

    pub async fn get_system_by_client_id(&self, client_id: &str) -> Result<System, AuthError> {
        self.repo
            .find_system_by_client_id(client_id)
            .await?
            .ok_or_else(|| AuthError::ClientNotFound {
                client_id: client_id.to_string(),
            })
    }

    /// Record a new public key for a system. Earlier keys are kept as history.
    pub async fn rotate_public_key(&self, system_id: u64, pem: &str) -> Result<EncryptionKey, AuthError> {
        parse_public_key(pem)?;
        let system = self.get_system(system_id).await?;

        let key = self
            .repo
            .insert_encryption_key(EncryptionKey {
                id: 0,
                system_id: system.id,
                body: pem.trim().to_string(),
                created_at: Utc::now(),
            })
            .await?;

        tracing::info!(system = system.id, key = key.id, "Rotated public key");
        Ok(key)
    }

    /// The most recently registered public key of a system.
    pub async fn get_public_key(&self, system_id: u64) -> Result<SystemPublicKey, AuthError> {
        let system = self.get_system(system_id).await?;
        let key = self
            .repo
            .current_encryption_key(system.id)
            .await?
            .ok_or_else(|| AuthError::not_found("public key for system", system.id))?;

        Ok(SystemPublicKey {
            client_id: system.client_id,
            public_key: key.body,
        })
    }

    /// Issue a new secret, revoking the current one in the same write.
    pub async fn reset_credentials(&self, system_id: u64) -> Result<SystemCredentials, AuthError> {
        let system = self.get_system(system_id).await?;

        let secret = generate_client_secret();
        self.repo.replace_secret(system.id, hash_secret(&secret)).await?;

        tracing::info!(system = system.id, "Reset credentials");
        Ok(credentials_for(&system, secret))
    }

    /// Revoke the current secret. The row is kept for audit.
    pub async fn deactivate_credentials(&self, system_id: u64) -> Result<(), AuthError> {
        let system = self.get_system(system_id).await?;
        let revoked = self.repo.revoke_secrets(system.id).await?;
        tracing::info!(system = system.id, revoked, "Deactivated credentials");
        Ok(())
    }

    /// Check a client id and secret against the system's current secret.
    ///
    /// Unknown clients, clients without a current secret and wrong secrets
    /// all yield `Ok(false)`.
    pub async fn authenticate(&self, client_id: &str, secret: &Secret) -> Result<bool, AuthError> {
        let Some(system) = self.repo.find_system_by_client_id(client_id).await? else {
            tracing::debug!("Authentication for unknown client {}", client_id);
            return Ok(false);
        };
        let Some(current) = self.repo.current_secret(system.id).await? else {
            return Ok(false);
        };
        Ok(verify_secret(secret, &current.hash))
    }
}

fn credentials_for(system: &System, secret: Secret) -> SystemCredentials {
    SystemCredentials {
        system_id: system.id.to_string(),
        client_id: system.client_id.clone(),
        client_secret: secret,
        client_name: system.client_name.clone(),
        token: None,
    }
}
