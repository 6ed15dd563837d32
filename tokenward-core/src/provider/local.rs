//! In-process provider backed by the token authority and local stores.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use super::{
    AccessTokenParams, AuthProvider, ClientCredentials, ClientParams, ProviderKind,
    RegisterClientParams, RevocationSummary, UpdateClientParams,
};
use crate::credentials::{CredentialStore, RegisterSystem, parse_public_key};
use crate::error::AuthError;
use crate::model::{Aco, SystemCredentials, User};
use crate::store::Repository;
use crate::tenant::TenantDirectory;
use crate::token::{Claims, IssuedToken};
use crate::token_authority::TokenAuthority;

/// Provider that issues and validates tokens in this process.
///
/// A client is an ACO: registering a client records the ACO's UUID as its
/// client id, and every token of the client belongs to one of the ACO's users.
#[derive(Clone)]
pub struct LocalProvider {
    authority: TokenAuthority,
    credentials: CredentialStore,
    tenants: TenantDirectory,
    repo: Arc<dyn Repository>,
}

impl LocalProvider {
    pub fn new(authority: TokenAuthority, repo: Arc<dyn Repository>) -> Self {
        Self {
            authority,
            credentials: CredentialStore::new(repo.clone()),
            tenants: TenantDirectory::new(repo.clone()),
            repo,
        }
    }

    pub fn authority(&self) -> &TokenAuthority {
        &self.authority
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn tenants(&self) -> &TenantDirectory {
        &self.tenants
    }

    /// Create a group's system and hand back its credentials with a token.
    ///
    /// The token is signed for the new client (`sub` and `cid` are the client
    /// id, `aco` the group id, `scp` the requested scope). It is not
    /// persisted, so it cannot be revoked individually.
    ///
    /// The token is informational only. Its `aco` claim is a group id rather
    /// than an ACO UUID and no token row backs it, so
    /// [`AuthProvider::validate_access_token`] rejects it with
    /// [`AuthError::UnknownAco`].
    pub async fn register_system(
        &self,
        request: RegisterSystem,
    ) -> Result<SystemCredentials, AuthError> {
        let scope = request.scope.trim().to_string();
        let group_id = request.group_id.trim().to_string();
        let mut creds = self.credentials.register_system(request).await?;

        let claims = Claims::new(
            creds.client_id.clone(),
            group_id,
            Uuid::new_v4().to_string(),
            self.authority.default_ttl(),
        )?
        .with_scopes(vec![scope])
        .with_client_id(creds.client_id.clone());
        creds.token = Some(self.authority.sign_jwt_token(&claims)?);

        Ok(creds)
    }

    async fn aco_for_client(&self, client_id: &str) -> Result<Aco, AuthError> {
        self.repo
            .find_aco_by_client_id(client_id.trim())
            .await?
            .ok_or_else(|| AuthError::ClientNotFound {
                client_id: client_id.to_string(),
            })
    }

    async fn first_user(&self, aco: &Aco) -> Result<User, AuthError> {
        self.repo
            .users_for_aco(aco.uuid)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AuthError::not_found("user for aco", aco.uuid))
    }
}

#[async_trait]
impl AuthProvider for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    async fn register_client(&self, params: RegisterClientParams) -> Result<String, AuthError> {
        params.validate()?;
        if let Some(pem) = params.public_key.as_deref() {
            parse_public_key(pem)?;
        }

        let aco_id = Uuid::parse_str(params.aco_id.trim())
            .map_err(|_| AuthError::invalid("aco_id must be a 36-character UUID"))?;
        let mut aco = self.tenants.get_aco(aco_id).await?;

        let client_id = aco.uuid.to_string();
        aco.client_id = Some(client_id.clone());
        if let Some(pem) = params.public_key {
            aco.public_key = Some(pem.trim().to_string());
        }
        self.repo.update_aco(aco).await?;

        tracing::info!(aco = %aco_id, "Registered client {}", client_id);
        Ok(client_id)
    }

    async fn update_client(&self, params: UpdateClientParams) -> Result<(), AuthError> {
        params.validate()?;
        if let Some(pem) = params.public_key.as_deref() {
            parse_public_key(pem)?;
        }

        let mut aco = self.aco_for_client(&params.client_id).await?;
        if let Some(name) = params.name {
            aco.name = name.trim().to_string();
        }
        if let Some(pem) = params.public_key {
            aco.public_key = Some(pem.trim().to_string());
        }
        let aco_id = aco.uuid;
        self.repo.update_aco(aco).await?;

        tracing::info!(aco = %aco_id, "Updated client {}", params.client_id);
        Ok(())
    }

    async fn delete_client(&self, params: ClientParams) -> Result<(), AuthError> {
        params.validate()?;
        let summary = self.revoke_client_credentials(params.clone()).await?;

        let mut aco = self.aco_for_client(&params.client_id).await?;
        aco.client_id = None;
        let aco_id = aco.uuid;
        self.repo.update_aco(aco).await?;

        tracing::info!(
            aco = %aco_id,
            revoked = summary.revoked,
            "Deleted client {}",
            params.client_id
        );
        Ok(())
    }

    async fn generate_client_credentials(
        &self,
        params: ClientParams,
    ) -> Result<ClientCredentials, AuthError> {
        params.validate()?;

        let not_found = || AuthError::ClientNotFound {
            client_id: params.client_id.clone(),
        };
        let aco_id = Uuid::parse_str(params.client_id.trim()).map_err(|_| not_found())?;
        let aco = self.repo.get_aco(aco_id).await?.ok_or_else(not_found)?;
        let Some(client_id) = aco.client_id.clone().filter(|id| !id.is_empty()) else {
            return Err(AuthError::NoRegisteredClient {
                aco: aco.uuid.to_string(),
            });
        };

        let users = self.repo.users_for_aco(aco.uuid).await?;
        let Some(user) = users.first() else {
            return Err(AuthError::not_found("user for aco", aco.uuid));
        };
        let user_ids: Vec<Uuid> = users.iter().map(|u| u.uuid).collect();

        let (issued, replaced) = self.authority.reissue_token(user, &user_ids).await?;
        let expires_at = issued.expires_at();

        tracing::info!(
            aco = %aco.uuid,
            revoked = replaced,
            "Generated credentials for client {}",
            client_id
        );

        Ok(ClientCredentials {
            client_id,
            client_secret: None,
            token: Some(issued.token),
            expires_at,
        })
    }

    async fn revoke_client_credentials(
        &self,
        params: ClientParams,
    ) -> Result<RevocationSummary, AuthError> {
        params.validate()?;

        let aco = self.aco_for_client(&params.client_id).await?;
        let user_ids: Vec<Uuid> = self
            .repo
            .users_for_aco(aco.uuid)
            .await?
            .into_iter()
            .map(|user| user.uuid)
            .collect();
        if user_ids.is_empty() {
            tracing::debug!(aco = %aco.uuid, "Client has no users; nothing to revoke");
            return Ok(RevocationSummary::default());
        }

        let tokens = self.repo.active_tokens_for_users(&user_ids).await?;
        let mut summary = RevocationSummary {
            total: tokens.len(),
            ..RevocationSummary::default()
        };

        for token in tokens {
            match self.authority.revoke_token_by_id(token.uuid).await {
                Ok(true) => summary.revoked += 1,
                Ok(false) => summary.already_inactive += 1,
                Err(err) => {
                    tracing::warn!(
                        token_id = %token.uuid,
                        "Revocation stopped after {} of {} token(s)",
                        summary.revoked,
                        summary.total
                    );
                    return Err(AuthError::PartialRevocation {
                        revoked: summary.revoked,
                        total: summary.total,
                        reason: err.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            aco = %aco.uuid,
            revoked = summary.revoked,
            "Revoked credentials of client {}",
            params.client_id
        );
        Ok(summary)
    }

    async fn request_access_token(
        &self,
        params: AccessTokenParams,
    ) -> Result<IssuedToken, AuthError> {
        params.validate()?;
        let ttl = params.ttl()?;

        let aco = self.aco_for_client(&params.client_id).await?;
        let user = self.first_user(&aco).await?;
        self.authority.create_token_with_ttl(&user, ttl).await
    }

    async fn revoke_access_token(&self, token: &str) -> Result<(), AuthError> {
        self.authority.revoke_token(token).await
    }

    async fn validate_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.authority.validate_token(token).await
    }

    async fn decode_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.authority.decode_token(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::GroupData;
    use crate::store::MemoryRepository;
    use crate::store::flaky::FlakyBackend;
    use crate::token_authority::SigningKeys;

    const PRIVATE_PEM: &[u8] = include_bytes!("../../testdata/signing_private.pem");
    const PUBLIC_PEM: &[u8] = include_bytes!("../../testdata/signing_public.pem");
    const SYSTEM_PUBLIC_PEM: &str = include_str!("../../testdata/system1_public.pem");

    async fn setup() -> (LocalProvider, Aco) {
        setup_with(Arc::new(MemoryRepository::new())).await
    }

    async fn setup_with(repo: Arc<dyn Repository>) -> (LocalProvider, Aco) {
        let keys = SigningKeys::from_pem(PRIVATE_PEM, PUBLIC_PEM).unwrap();
        let provider = LocalProvider::new(TokenAuthority::new(keys, repo.clone()), repo);

        let aco = provider.tenants().create_aco("ACO Corp").await.unwrap();
        provider
            .tenants()
            .create_user(&aco.uuid.to_string(), "Jane Doe", "jane@example.com")
            .await
            .unwrap();
        (provider, aco)
    }

    #[tokio::test]
    async fn test_register_client_uses_aco_uuid() {
        let (provider, aco) = setup().await;

        let client_id = provider
            .register_client(RegisterClientParams::new(aco.uuid.to_string()))
            .await
            .unwrap();
        assert_eq!(client_id, aco.uuid.to_string());

        let stored = provider.tenants().get_aco(aco.uuid).await.unwrap();
        assert_eq!(stored.client_id.as_deref(), Some(client_id.as_str()));
    }

    #[tokio::test]
    async fn test_register_client_rejects_bad_or_unknown_aco() {
        let (provider, _) = setup().await;

        let err = provider
            .register_client(RegisterClientParams::new("1234"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = provider
            .register_client(RegisterClientParams::new(Uuid::new_v4().to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_update_client_renames_aco() {
        let (provider, aco) = setup().await;
        let client_id = provider
            .register_client(RegisterClientParams::new(aco.uuid.to_string()))
            .await
            .unwrap();

        provider
            .update_client(UpdateClientParams {
                client_id,
                name: Some("ACO Renamed".to_string()),
                public_key: Some(SYSTEM_PUBLIC_PEM.to_string()),
            })
            .await
            .unwrap();

        let stored = provider.tenants().get_aco(aco.uuid).await.unwrap();
        assert_eq!(stored.name, "ACO Renamed");
        assert!(stored.public_key.is_some());

        let err = provider
            .update_client(UpdateClientParams {
                client_id: "unknown".to_string(),
                name: Some("x".to_string()),
                public_key: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ClientNotFound { .. }));
    }

    #[tokio::test]
    async fn test_generate_requires_registered_client() {
        let (provider, aco) = setup().await;

        let err = provider
            .generate_client_credentials(ClientParams::new(aco.uuid.to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NoRegisteredClient { .. }));

        let err = provider
            .generate_client_credentials(ClientParams::new(Uuid::new_v4().to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ClientNotFound { .. }));
    }

    #[tokio::test]
    async fn test_generate_revokes_previous_tokens() {
        let (provider, aco) = setup().await;
        let client_id = provider
            .register_client(RegisterClientParams::new(aco.uuid.to_string()))
            .await
            .unwrap();

        let first = provider
            .generate_client_credentials(ClientParams::new(client_id.clone()))
            .await
            .unwrap();
        let first_token = first.token.unwrap();
        assert!(
            provider
                .validate_access_token(first_token.expose())
                .await
                .is_ok()
        );

        let second = provider
            .generate_client_credentials(ClientParams::new(client_id))
            .await
            .unwrap();

        let err = provider
            .validate_access_token(first_token.expose())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Revoked);
        assert!(
            provider
                .validate_access_token(second.token.unwrap().expose())
                .await
                .is_ok()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_generate_leaves_one_active_token() {
        let (provider, aco) = setup().await;
        let client_id = provider
            .register_client(RegisterClientParams::new(aco.uuid.to_string()))
            .await
            .unwrap();
        let user_ids: Vec<Uuid> = provider
            .repo
            .users_for_aco(aco.uuid)
            .await
            .unwrap()
            .iter()
            .map(|u| u.uuid)
            .collect();

        for _ in 0..50 {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let provider = provider.clone();
                    let params = ClientParams::new(client_id.clone());
                    tokio::spawn(async move { provider.generate_client_credentials(params).await })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            let active = provider.repo.active_tokens_for_users(&user_ids).await.unwrap();
            assert_eq!(active.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_partial_revocation_reports_progress_and_redrives() {
        let backend = Arc::new(FlakyBackend::new());
        let (provider, aco) = setup_with(backend.clone()).await;
        let client_id = provider
            .register_client(RegisterClientParams::new(aco.uuid.to_string()))
            .await
            .unwrap();
        for _ in 0..3 {
            provider
                .request_access_token(AccessTokenParams::new(client_id.clone(), 1))
                .await
                .unwrap();
        }

        // the second deactivation fails
        backend.fail_after(1);
        let err = provider
            .revoke_client_credentials(ClientParams::new(client_id.clone()))
            .await
            .unwrap_err();
        match &err {
            AuthError::PartialRevocation { revoked, total, reason } => {
                assert_eq!(*revoked, 1);
                assert_eq!(*total, 3);
                assert!(reason.contains("disk unavailable"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::PartialRevocation);

        backend.fail_after(usize::MAX);
        let summary = provider
            .revoke_client_credentials(ClientParams::new(client_id))
            .await
            .unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.revoked, 2);
        assert_eq!(summary.already_inactive, 0);
    }

    #[tokio::test]
    async fn test_revoke_client_credentials_is_redrivable() {
        let (provider, aco) = setup().await;
        let client_id = provider
            .register_client(RegisterClientParams::new(aco.uuid.to_string()))
            .await
            .unwrap();

        for _ in 0..3 {
            provider
                .request_access_token(AccessTokenParams::new(client_id.clone(), 1))
                .await
                .unwrap();
        }

        let summary = provider
            .revoke_client_credentials(ClientParams::new(client_id.clone()))
            .await
            .unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.revoked, 3);

        let again = provider
            .revoke_client_credentials(ClientParams::new(client_id))
            .await
            .unwrap();
        assert_eq!(again, RevocationSummary::default());
    }

    #[tokio::test]
    async fn test_request_access_token_honors_ttl() {
        let (provider, aco) = setup().await;
        let client_id = provider
            .register_client(RegisterClientParams::new(aco.uuid.to_string()))
            .await
            .unwrap();

        let issued = provider
            .request_access_token(AccessTokenParams::new(client_id, 2))
            .await
            .unwrap();
        assert_eq!(issued.claims.exp - issued.claims.iat, 2 * 3600);
        assert_eq!(issued.claims.aco, aco.uuid.to_string());

        let err = provider
            .request_access_token(AccessTokenParams::new("", -1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_delete_client_revokes_and_forgets() {
        let (provider, aco) = setup().await;
        let client_id = provider
            .register_client(RegisterClientParams::new(aco.uuid.to_string()))
            .await
            .unwrap();
        let issued = provider
            .request_access_token(AccessTokenParams::new(client_id.clone(), 1))
            .await
            .unwrap();

        provider
            .delete_client(ClientParams::new(client_id.clone()))
            .await
            .unwrap();

        let err = provider
            .validate_access_token(issued.token.expose())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Revoked);
        assert!(provider.tenants().get_aco(aco.uuid).await.unwrap().client_id.is_none());

        let err = provider
            .request_access_token(AccessTokenParams::new(client_id, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ClientNotFound { .. }));
    }

    #[tokio::test]
    async fn test_register_system_returns_signed_token() {
        let (provider, _) = setup().await;
        provider
            .credentials()
            .create_group(GroupData {
                group_id: "A12345".to_string(),
                name: "ACO Corp Systems".to_string(),
                ..GroupData::default()
            })
            .await
            .unwrap();

        let creds = provider
            .register_system(RegisterSystem {
                group_id: "A12345".to_string(),
                client_name: "ACO System A".to_string(),
                scope: "bcda-api".to_string(),
                public_key: SYSTEM_PUBLIC_PEM.to_string(),
                tracking_id: "T00001".to_string(),
            })
            .await
            .unwrap();

        let token = creds.token.unwrap();
        let claims = provider.decode_access_token(token.expose()).await.unwrap();
        assert_eq!(claims.sub, creds.client_id);
        assert_eq!(claims.aco, "A12345");
        assert_eq!(claims.scp, vec!["bcda-api".to_string()]);
        assert_eq!(claims.cid.as_deref(), Some(creds.client_id.as_str()));

        let err = provider
            .validate_access_token(token.expose())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnknownAco { ref aco } if aco == "A12345"));
    }
}
