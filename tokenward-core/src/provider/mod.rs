//! Authentication provider abstraction.
//!
//! This module provides:
//! - [`AuthProvider`] - The client and token lifecycle every backend implements
//! - [`LocalProvider`] - Backed by the in-process token authority and stores
//! - [`TestProvider`] - Deterministic, non-persistent, never in production
//! - Typed parameter structs, each validated once with every problem reported
//!
//! The remote variant lives in the `tokenward-client` crate. Exactly one
//! provider is built at startup and handed to callers as
//! `Arc<dyn AuthProvider>`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AuthError, Problems};
use crate::secret::Secret;
use crate::token::{Claims, IssuedToken};

mod local;
mod testing;

pub use local::LocalProvider;
pub use testing::{TestClient, TestProvider, TokenOverrides};

/// Deployment environment the process runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
    Development,
    Test,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Development => "development",
            Environment::Test => "test",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "staging" => Ok(Environment::Staging),
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            other => Err(AuthError::config(format!("unknown environment '{other}'"))),
        }
    }
}

/// Which [`AuthProvider`] implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Local,
    Remote,
    Test,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::Remote => "remote",
            ProviderKind::Test => "test",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "alpha" => Ok(ProviderKind::Local),
            "remote" | "ssas" => Ok(ProviderKind::Remote),
            "test" | "mock" => Ok(ProviderKind::Test),
            other => Err(AuthError::config(format!("unknown provider '{other}'"))),
        }
    }
}

fn check_uuid(problems: &mut Problems, value: &str, field: &str) {
    let value = value.trim();
    if value.is_empty() {
        problems.push(format!("{field} must be provided"));
    } else if value.len() != 36 || Uuid::parse_str(value).is_err() {
        problems.push(format!("{field} must be a 36-character UUID"));
    }
}

/// Parameters for [`AuthProvider::register_client`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterClientParams {
    /// UUID of the ACO the client is registered for.
    pub aco_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub tracking_id: Option<String>,
}

impl RegisterClientParams {
    pub fn new(aco_id: impl Into<String>) -> Self {
        Self {
            aco_id: aco_id.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        let mut problems = Problems::new();
        check_uuid(&mut problems, &self.aco_id, "aco_id");
        problems.finish()
    }

    /// Validation for backends that need a named client with a public key.
    pub fn validate_with_key(&self) -> Result<(), AuthError> {
        let mut problems = Problems::new();
        check_uuid(&mut problems, &self.aco_id, "aco_id");
        problems.require(&self.name, "name");
        problems.check(
            self.public_key.as_deref().is_some_and(|k| !k.trim().is_empty()),
            "public_key must be provided",
        );
        problems.finish()
    }
}

/// Parameters for [`AuthProvider::update_client`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateClientParams {
    pub client_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
}

impl UpdateClientParams {
    pub fn validate(&self) -> Result<(), AuthError> {
        let mut problems = Problems::new();
        problems.require(&self.client_id, "client_id");
        if let Some(name) = &self.name {
            problems.require(name, "name");
        }
        problems.check(
            self.name.is_some() || self.public_key.is_some(),
            "at least one of name or public_key must be provided",
        );
        problems.finish()
    }
}

/// Parameters naming an existing client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientParams {
    pub client_id: String,
}

impl ClientParams {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        let mut problems = Problems::new();
        problems.require(&self.client_id, "client_id");
        problems.finish()
    }
}

/// Parameters for [`AuthProvider::request_access_token`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenParams {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<Secret>,
    pub ttl_hours: i64,
}

impl AccessTokenParams {
    pub fn new(client_id: impl Into<String>, ttl_hours: i64) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            ttl_hours,
        }
    }

    pub fn with_secret(mut self, secret: Secret) -> Self {
        self.client_secret = Some(secret);
        self
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        self.problems().finish()
    }

    /// Validation for backends that authenticate with the client secret.
    pub fn validate_with_secret(&self) -> Result<(), AuthError> {
        let mut problems = self.problems();
        problems.check(
            self.client_secret
                .as_ref()
                .is_some_and(|s| !s.expose().trim().is_empty()),
            "client_secret must be provided",
        );
        problems.finish()
    }

    /// The requested lifetime. Only meaningful after validation.
    pub fn ttl(&self) -> Result<Duration, AuthError> {
        Duration::try_hours(self.ttl_hours)
            .filter(|_| self.ttl_hours > 0)
            .ok_or_else(|| AuthError::invalid("ttl_hours must be a positive number of hours"))
    }

    fn problems(&self) -> Problems {
        let mut problems = Problems::new();
        problems.require(&self.client_id, "client_id");
        problems.check(
            self.ttl().is_ok(),
            "ttl_hours must be a positive number of hours",
        );
        problems
    }
}

/// Credentials issued by [`AuthProvider::generate_client_credentials`].
///
/// Which fields are present depends on the backend: the local backend issues
/// a token, the remote backend a new client secret.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<Secret>,
    pub token: Option<Secret>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Outcome of revoking every token of a client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationSummary {
    /// Active tokens found when the revocation started.
    pub total: usize,
    /// Tokens this call moved to inactive.
    pub revoked: usize,
    /// Tokens that were already inactive by the time they were reached.
    pub already_inactive: usize,
}

/// Client registration and token lifecycle.
///
/// Every operation validates its parameters before touching any state and
/// fails with a single aggregated `Validation` error when they are wrong.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Which implementation this is.
    fn kind(&self) -> ProviderKind;

    /// Register a client for an ACO and return the id the backend knows it by.
    async fn register_client(&self, params: RegisterClientParams) -> Result<String, AuthError>;

    async fn update_client(&self, params: UpdateClientParams) -> Result<(), AuthError>;

    /// Revoke everything the client holds, then forget it.
    async fn delete_client(&self, params: ClientParams) -> Result<(), AuthError>;

    /// Revoke all live credentials of the client, then issue new ones.
    async fn generate_client_credentials(
        &self,
        params: ClientParams,
    ) -> Result<ClientCredentials, AuthError>;

    /// Revoke every active token of the client.
    ///
    /// Tokens that turn out to be inactive already count as satisfied, so
    /// calling this again after a partial failure is safe.
    async fn revoke_client_credentials(
        &self,
        params: ClientParams,
    ) -> Result<RevocationSummary, AuthError>;

    async fn request_access_token(&self, params: AccessTokenParams)
    -> Result<IssuedToken, AuthError>;

    async fn revoke_access_token(&self, token: &str) -> Result<(), AuthError>;

    /// Full validation, including revocation state.
    async fn validate_access_token(&self, token: &str) -> Result<Claims, AuthError>;

    /// Structural decode with signature check and no freshness check.
    async fn decode_access_token(&self, token: &str) -> Result<Claims, AuthError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_params_require_uuid() {
        assert!(RegisterClientParams::new("0c527d2e-2e8a-4808-b11d-0fa06baf8254").validate().is_ok());
        assert!(RegisterClientParams::new("0c527d2e2e8a4808b11d0fa06baf8254").validate().is_err());
        assert!(RegisterClientParams::new("").validate().is_err());
    }

    #[test]
    fn test_register_params_with_key_aggregate() {
        let err = RegisterClientParams::new("abc").validate_with_key().unwrap_err();
        match err {
            AuthError::Validation { problems } => assert_eq!(problems.len(), 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_access_token_params_validation() {
        assert!(AccessTokenParams::new("client", 1).validate().is_ok());

        let err = AccessTokenParams::new("", 0).validate().unwrap_err();
        match err {
            AuthError::Validation { problems } => assert_eq!(problems.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(AccessTokenParams::new("client", 1).validate_with_secret().is_err());
        assert!(
            AccessTokenParams::new("client", 1)
                .with_secret(Secret::new("s3cret"))
                .validate_with_secret()
                .is_ok()
        );
        assert!(AccessTokenParams::new("client", i64::MAX).validate().is_err());
    }

    #[test]
    fn test_update_params_need_a_change() {
        let params = UpdateClientParams {
            client_id: "client".to_string(),
            ..UpdateClientParams::default()
        };
        assert!(params.validate().is_err());

        let params = UpdateClientParams {
            client_id: "client".to_string(),
            name: Some("Renamed".to_string()),
            public_key: None,
        };
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_environment_and_kind_parse() {
        assert_eq!("PRODUCTION".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("ssas".parse::<ProviderKind>().unwrap(), ProviderKind::Remote);
        assert!("okta".parse::<ProviderKind>().is_err());
    }
}
