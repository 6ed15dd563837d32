use async_trait::async_trait;
use tokenward_core::token::insecure_decode;
use tokenward_core::{
    AccessTokenParams, AuthError, AuthProvider, Claims, ClientCredentials, ClientParams,
    IssuedToken, ProviderKind, RegisterClientParams, RevocationSummary, UpdateClientParams,
};
use tracing::{debug, info};

use crate::client::RemoteServiceClient;
use crate::config::RemoteConfig;
use crate::types::{CreateSystemRequest, DEFAULT_SCOPE};

/// [`AuthProvider`] that forwards to the remote credential service.
///
/// Clients are remote systems: the id returned by `register_client` and
/// accepted by the other client operations is the remote system id.
/// Token signatures are checked by the service, so tokens are only decoded
/// locally to read their claims.
#[derive(Debug, Clone)]
pub struct RemoteProvider {
    client: RemoteServiceClient,
    scope: String,
}

impl RemoteProvider {
    pub fn new(client: RemoteServiceClient) -> Self {
        Self {
            client,
            scope: DEFAULT_SCOPE.to_string(),
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self, AuthError> {
        Ok(Self::new(RemoteServiceClient::new(config)?))
    }

    /// Scope requested for systems created by `register_client`.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn client(&self) -> &RemoteServiceClient {
        &self.client
    }

    fn claims_of(token: &str) -> Result<Claims, AuthError> {
        insecure_decode(token)?.into_claims()
    }
}

#[async_trait]
impl AuthProvider for RemoteProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Remote
    }

    /// Create a group named after the ACO, then its system.
    async fn register_client(&self, params: RegisterClientParams) -> Result<String, AuthError> {
        params.validate_with_key()?;
        let aco_id = params.aco_id.trim();

        self.client.create_group(aco_id, params.name.trim()).await?;
        let creds = self
            .client
            .create_system(&CreateSystemRequest {
                client_name: params.name.trim().to_string(),
                group_id: aco_id.to_string(),
                scope: self.scope.clone(),
                public_key: params.public_key.clone().unwrap_or_default(),
                tracking_id: params
                    .tracking_id
                    .clone()
                    .unwrap_or_else(|| aco_id.to_string()),
            })
            .await?;

        let system_id = if creds.system_id.is_empty() {
            creds.client_id.clone()
        } else {
            creds.system_id.clone()
        };
        info!(aco = %aco_id, "Registered remote client {}", creds.client_id);
        Ok(system_id)
    }

    async fn update_client(&self, _params: UpdateClientParams) -> Result<(), AuthError> {
        Err(AuthError::Unsupported {
            operation: "update_client",
            backend: "remote",
        })
    }

    async fn delete_client(&self, params: ClientParams) -> Result<(), AuthError> {
        params.validate()?;
        self.client.delete_credentials(params.client_id.trim()).await?;
        info!("Deleted credentials of remote client {}", params.client_id);
        Ok(())
    }

    /// Reset the system's secret. The service revokes the old one.
    async fn generate_client_credentials(
        &self,
        params: ClientParams,
    ) -> Result<ClientCredentials, AuthError> {
        params.validate()?;
        let creds = self.client.reset_credentials(params.client_id.trim()).await?;
        Ok(ClientCredentials {
            client_id: creds.client_id,
            client_secret: Some(creds.client_secret),
            token: creds.token,
            expires_at: None,
        })
    }

    /// The service does not report counts; a success is one revoked credential.
    async fn revoke_client_credentials(
        &self,
        params: ClientParams,
    ) -> Result<RevocationSummary, AuthError> {
        params.validate()?;
        self.client.delete_credentials(params.client_id.trim()).await?;
        Ok(RevocationSummary {
            total: 1,
            revoked: 1,
            already_inactive: 0,
        })
    }

    async fn request_access_token(
        &self,
        params: AccessTokenParams,
    ) -> Result<IssuedToken, AuthError> {
        params.validate_with_secret()?;
        let Some(secret) = params.client_secret.as_ref() else {
            return Err(AuthError::invalid("client_secret must be provided"));
        };
        debug!(
            ttl_hours = params.ttl_hours,
            "Remote service chooses the token lifetime"
        );

        let response = self.client.get_token(params.client_id.trim(), secret).await?;
        let claims = Self::claims_of(response.access_token.expose())?;
        Ok(IssuedToken {
            token: response.access_token,
            claims,
        })
    }

    async fn revoke_access_token(&self, token: &str) -> Result<(), AuthError> {
        let raw = insecure_decode(token)?;
        let Some(id) = raw.id.filter(|id| !id.trim().is_empty()) else {
            return Err(AuthError::MissingClaims { claims: vec!["id"] });
        };
        self.client.revoke_access_token(&id).await?;
        info!(token_id = %id, "Revoked remote token");
        Ok(())
    }

    /// Check claims and expiry locally, then ask the service whether the
    /// token is still active. An expiry reported by the service that has
    /// already passed fails as `Expired`, even if the token's own claim has not.
    async fn validate_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = Self::claims_of(token)?;
        if claims.is_expired() {
            return Err(AuthError::Expired {
                expired_at: claims.exp,
            });
        }

        let introspection = self.client.verify_public_token(token).await?;
        if let Some(expired_at) = introspection.expired_at() {
            return Err(AuthError::Expired { expired_at });
        }
        if !introspection.active {
            return Err(AuthError::Revoked {
                token_id: claims.id,
            });
        }
        Ok(claims)
    }

    async fn decode_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        Self::claims_of(token)
    }
}
