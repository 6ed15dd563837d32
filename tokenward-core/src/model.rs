//! Domain model types for Tokenward.
//!
//! This module defines the rows the repository persists:
//! - [`Aco`] - The tenant boundary; owns users and (once registered) a client
//! - [`User`] - A person belonging to exactly one ACO
//! - [`TokenRecord`] - The audit row behind every issued bearer token
//! - [`Group`] - An organization registered with the credential store
//! - [`System`] - The single API client of a group
//! - [`EncryptionKey`] - One entry of a system's public-key rotation history
//! - [`SecretRecord`] - The salted hash of a system's client secret

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::{Uuid, uuid};

use crate::error::AuthError;
use crate::secret::Secret;

/// A tenant organization.
///
/// `client_id` stays `None` until a client is registered for the ACO, and is
/// cleared again when that client is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aco {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub private_key: Option<Secret>,
    pub created_at: DateTime<Utc>,
}

impl Aco {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_uuid(Uuid::new_v4(), name)
    }

    /// Build an ACO with a caller-chosen UUID (fixed alpha tenants).
    pub fn with_uuid(uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            uuid,
            name: name.into(),
            client_id: None,
            public_key: None,
            private_key: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uuid: Uuid,
    pub name: String,
    pub email: String,
    pub aco_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Persisted state of an issued bearer token.
///
/// The signed token itself is never stored, only its SHA-256 digest.
/// `active` only ever moves from `true` to `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub uuid: Uuid,
    pub user_id: Uuid,
    pub aco_id: Uuid,
    pub value_hash: String,
    pub active: bool,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// The system section embedded in a group document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemData {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub software_id: String,
    #[serde(default)]
    pub client_name: String,
}

/// The document describing a group, as submitted by administrators.
///
/// Accepts `id` as an alias for `group_id` so documents written for the
/// remote service can be loaded unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupData {
    #[serde(default, alias = "id")]
    pub group_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub xdata: String,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub system: Option<SystemData>,
}

/// A registered organization. `group_id` never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: u64,
    pub group_id: String,
    pub data: GroupData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct System {
    pub id: u64,
    /// External `group_id` of the owning group.
    pub group_id: String,
    pub client_id: String,
    pub client_name: String,
    #[serde(default)]
    pub software_id: String,
    pub api_scope: String,
    pub created_at: DateTime<Utc>,
}

/// A public key registered for a system. The newest row is current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKey {
    pub id: u64,
    pub system_id: u64,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRecord {
    pub id: u64,
    pub system_id: u64,
    pub hash: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl SecretRecord {
    pub fn is_current(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// Credentials handed back once when a system is created or reset.
///
/// The plaintext secret is not recoverable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemCredentials {
    #[serde(default)]
    pub system_id: String,
    pub client_id: String,
    pub client_secret: Secret,
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub token: Option<Secret>,
}

/// The current public key of a system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemPublicKey {
    #[serde(default)]
    pub client_id: String,
    pub public_key: String,
}

/// Size classes of the fixed alpha tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcoSize {
    Dev,
    Small,
    Medium,
    Large,
}

pub const DEV_ACO_UUID: Uuid = uuid!("0c527d2e-2e8a-4808-b11d-0fa06baf8254");
pub const SMALL_ACO_UUID: Uuid = uuid!("3461C774-B48F-11E8-96F8-529269fb1459");
pub const MEDIUM_ACO_UUID: Uuid = uuid!("C74C008D-42F8-4ED9-BF88-CEE659C7F692");
pub const LARGE_ACO_UUID: Uuid = uuid!("8D80925A-027E-43DD-8AED-9A501CC4CD91");

impl AcoSize {
    pub const ALL: [AcoSize; 4] = [AcoSize::Dev, AcoSize::Small, AcoSize::Medium, AcoSize::Large];

    /// The fixed ACO UUID for this size class.
    pub fn aco_uuid(&self) -> Uuid {
        match self {
            AcoSize::Dev => DEV_ACO_UUID,
            AcoSize::Small => SMALL_ACO_UUID,
            AcoSize::Medium => MEDIUM_ACO_UUID,
            AcoSize::Large => LARGE_ACO_UUID,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AcoSize::Dev => "dev",
            AcoSize::Small => "small",
            AcoSize::Medium => "medium",
            AcoSize::Large => "large",
        }
    }
}

impl fmt::Display for AcoSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcoSize {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dev" => Ok(AcoSize::Dev),
            "small" => Ok(AcoSize::Small),
            "medium" => Ok(AcoSize::Medium),
            "large" => Ok(AcoSize::Large),
            other => Err(AuthError::invalid(format!(
                "invalid ACO size '{other}': expected one of dev, small, medium, large"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aco_size_parsing_is_case_insensitive() {
        assert_eq!("DEV".parse::<AcoSize>().unwrap(), AcoSize::Dev);
        assert_eq!("Medium".parse::<AcoSize>().unwrap(), AcoSize::Medium);
        assert!("huge".parse::<AcoSize>().is_err());
    }

    #[test]
    fn test_aco_size_maps_to_fixed_uuids() {
        assert_eq!(
            AcoSize::Dev.aco_uuid().to_string(),
            "0c527d2e-2e8a-4808-b11d-0fa06baf8254"
        );
        assert_eq!(
            AcoSize::Large.aco_uuid(),
            Uuid::parse_str("8d80925a-027e-43dd-8aed-9a501cc4cd91").unwrap()
        );
    }

    #[test]
    fn test_group_data_accepts_id_alias() {
        let json = r#"{
            "id": "A12345",
            "name": "ACO Corp Systems",
            "users": ["00uiqolo7fEFSfif70h7", "l0vckYyfyow4TZ0zOKek"],
            "scopes": ["bcda-api"],
            "resources": [{"id": "xxx", "name": "BCDA API", "scopes": ["bcda-api"]}],
            "system": {"client_id": "4tuhiOIFIwriIOH3zn", "software_id": "4NRB1-0XZABZI9E6-5SM3R", "client_name": "ACO System A"}
        }"#;
        let data: GroupData = serde_json::from_str(json).unwrap();
        assert_eq!(data.group_id, "A12345");
        assert_eq!(data.users.len(), 2);
        assert_eq!(data.resources[0].scopes, vec!["bcda-api"]);
        assert_eq!(data.system.unwrap().client_name, "ACO System A");
        assert!(data.xdata.is_empty());
    }

    #[test]
    fn test_secret_record_current_until_revoked() {
        let mut record = SecretRecord {
            id: 1,
            system_id: 1,
            hash: "sha256$aa$bb".to_string(),
            created_at: Utc::now(),
            revoked_at: None,
        };
        assert!(record.is_current());
        record.revoked_at = Some(Utc::now());
        assert!(!record.is_current());
    }
}
