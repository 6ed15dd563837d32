//! Deterministic provider for tests and local development.
//!
//! Nothing is persisted. Client ids are handed out in sequence
//! (`test-client-0001`, `test-client-0002`, ...) and tokens are signed with
//! RS256 under a fixed key id, so a test can predict everything except the
//! token ids and timestamps.

use async_trait::async_trait;
use chrono::Duration;
use jsonwebtoken::Algorithm;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use super::{
    AccessTokenParams, AuthProvider, ClientCredentials, ClientParams, Environment, ProviderKind,
    RegisterClientParams, RevocationSummary, UpdateClientParams,
};
use crate::error::AuthError;
use crate::secret::{Secret, generate_client_secret};
use crate::token::{self, Claims, IssuedToken};
use crate::token_authority::SigningKeys;

/// Claim values the test provider stamps on the tokens it issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenOverrides {
    /// `kid` header.
    pub key_id: String,
    pub issuer: Option<String>,
    /// Lifetime of tokens issued by `generate_client_credentials`.
    pub ttl: Duration,
    pub scopes: Vec<String>,
    /// Replaces the `cid` claim, which is otherwise the client id.
    pub client_id: Option<String>,
    /// Replaces the `sub` claim, which is otherwise the client id.
    pub subject: Option<String>,
}

impl Default for TokenOverrides {
    fn default() -> Self {
        Self {
            key_id: "tokenward-test".to_string(),
            issuer: Some("tokenward-test".to_string()),
            ttl: Duration::hours(500),
            scopes: vec!["bcda-api".to_string()],
            client_id: None,
            subject: None,
        }
    }
}

/// A client registered with the test provider.
#[derive(Debug, Clone)]
pub struct TestClient {
    pub aco_id: String,
    pub name: String,
    pub public_key: Option<String>,
    pub secret: Option<Secret>,
}

#[derive(Debug, Default)]
struct TestState {
    next_client: u32,
    clients: HashMap<String, TestClient>,
    /// Token id -> client id, for every token issued.
    issued: HashMap<String, String>,
    revoked: HashSet<String>,
}

impl TestState {
    fn revoke_live(&mut self, client_id: &str) -> RevocationSummary {
        let live: Vec<String> = self
            .issued
            .iter()
            .filter(|(id, owner)| owner.as_str() == client_id && !self.revoked.contains(*id))
            .map(|(id, _)| id.clone())
            .collect();
        let total = live.len();
        self.revoked.extend(live);

        RevocationSummary {
            total,
            revoked: total,
            already_inactive: 0,
        }
    }
}

/// In-memory [`AuthProvider`] with self-signed tokens.
pub struct TestProvider {
    env: Environment,
    keys: Arc<SigningKeys>,
    overrides: TokenOverrides,
    state: Mutex<TestState>,
}

impl TestProvider {
    /// Build a test provider. Fails in the production environment.
    pub fn new(env: Environment, keys: SigningKeys) -> Result<Self, AuthError> {
        if env == Environment::Production {
            return Err(AuthError::config(
                "the test provider cannot be used in the production environment",
            ));
        }
        tracing::warn!("Using the test provider in {}; tokens are not persisted", env);
        Ok(Self {
            env,
            keys: Arc::new(keys),
            overrides: TokenOverrides::default(),
            state: Mutex::new(TestState::default()),
        })
    }

    /// Build a test provider with a freshly generated keypair.
    pub fn generate(env: Environment) -> Result<Self, AuthError> {
        Self::new(env, SigningKeys::generate()?)
    }

    pub fn with_overrides(mut self, overrides: TokenOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn environment(&self) -> Environment {
        self.env
    }

    pub fn public_key_pem(&self) -> &str {
        self.keys.public_key_pem()
    }

    /// The registered state of a client, if it exists.
    pub fn client_info(&self, client_id: &str) -> Option<TestClient> {
        self.state.lock().clients.get(client_id).cloned()
    }

    /// Sign a token for a client without recording it.
    fn sign(&self, client_id: &str, aco_id: &str, ttl: Duration) -> Result<IssuedToken, AuthError> {
        let overrides = &self.overrides;
        let subject = overrides.subject.as_deref().unwrap_or(client_id);
        let mut claims = Claims::new(subject, aco_id, Uuid::new_v4().to_string(), ttl)?
            .with_scopes(overrides.scopes.clone())
            .with_client_id(overrides.client_id.as_deref().unwrap_or(client_id));
        if let Some(issuer) = &overrides.issuer {
            claims = claims.with_issuer(issuer.clone());
        }

        let signed = token::sign(
            &claims,
            Algorithm::RS256,
            Some(&overrides.key_id),
            self.keys.encoding_key(),
        )?;
        Ok(IssuedToken {
            token: signed,
            claims,
        })
    }

    fn issue(&self, client_id: &str, aco_id: &str, ttl: Duration) -> Result<IssuedToken, AuthError> {
        let issued = self.sign(client_id, aco_id, ttl)?;
        self.state
            .lock()
            .issued
            .insert(issued.claims.id.clone(), client_id.to_string());

        tracing::debug!(token_id = %issued.claims.id, "Issued test token for {}", client_id);
        Ok(issued)
    }

    fn client(&self, client_id: &str) -> Result<TestClient, AuthError> {
        self.state
            .lock()
            .clients
            .get(client_id.trim())
            .cloned()
            .ok_or_else(|| not_found(client_id))
    }
}

fn not_found(client_id: &str) -> AuthError {
    AuthError::ClientNotFound {
        client_id: client_id.to_string(),
    }
}

#[async_trait]
impl AuthProvider for TestProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Test
    }

    async fn register_client(&self, params: RegisterClientParams) -> Result<String, AuthError> {
        params.validate()?;

        let mut state = self.state.lock();
        state.next_client += 1;
        let client_id = format!("test-client-{:04}", state.next_client);
        state.clients.insert(
            client_id.clone(),
            TestClient {
                aco_id: params.aco_id.trim().to_string(),
                name: params.name,
                public_key: params.public_key,
                secret: None,
            },
        );

        tracing::info!("Registered test client {}", client_id);
        Ok(client_id)
    }

    async fn update_client(&self, params: UpdateClientParams) -> Result<(), AuthError> {
        params.validate()?;

        let mut state = self.state.lock();
        let client = state
            .clients
            .get_mut(params.client_id.trim())
            .ok_or_else(|| not_found(&params.client_id))?;
        if let Some(name) = params.name {
            client.name = name;
        }
        if let Some(pem) = params.public_key {
            client.public_key = Some(pem);
        }
        Ok(())
    }

    async fn delete_client(&self, params: ClientParams) -> Result<(), AuthError> {
        params.validate()?;
        let client_id = params.client_id.trim();

        let mut state = self.state.lock();
        if state.clients.remove(client_id).is_none() {
            return Err(not_found(client_id));
        }
        state.revoke_live(client_id);
        drop(state);

        tracing::info!("Deleted test client {}", params.client_id);
        Ok(())
    }

    async fn generate_client_credentials(
        &self,
        params: ClientParams,
    ) -> Result<ClientCredentials, AuthError> {
        params.validate()?;
        let client_id = params.client_id.trim();
        let client = self.client(client_id)?;

        let secret = generate_client_secret();
        let issued = self.sign(client_id, &client.aco_id, self.overrides.ttl)?;
        let expires_at = issued.expires_at();

        let mut state = self.state.lock();
        let stored = state
            .clients
            .get_mut(client_id)
            .ok_or_else(|| not_found(client_id))?;
        stored.secret = Some(secret.clone());
        let summary = state.revoke_live(client_id);
        state
            .issued
            .insert(issued.claims.id.clone(), client_id.to_string());
        drop(state);

        tracing::info!(
            token_id = %issued.claims.id,
            revoked = summary.revoked,
            "Generated test credentials for {}",
            client_id
        );

        Ok(ClientCredentials {
            client_id: client_id.to_string(),
            client_secret: Some(secret),
            token: Some(issued.token),
            expires_at,
        })
    }

    async fn revoke_client_credentials(
        &self,
        params: ClientParams,
    ) -> Result<RevocationSummary, AuthError> {
        params.validate()?;
        let client_id = params.client_id.trim();

        let mut state = self.state.lock();
        if !state.clients.contains_key(client_id) {
            return Err(not_found(client_id));
        }
        Ok(state.revoke_live(client_id))
    }

    async fn request_access_token(
        &self,
        params: AccessTokenParams,
    ) -> Result<IssuedToken, AuthError> {
        params.validate()?;
        let ttl = params.ttl()?;
        let client_id = params.client_id.trim();
        let client = self.client(client_id)?;

        match (&client.secret, &params.client_secret) {
            (Some(_), None) => return Err(AuthError::invalid("client_secret must be provided")),
            // Secret compares in constant time.
            (Some(expected), Some(given)) if expected != given => {
                return Err(AuthError::invalid("client_secret does not match"));
            }
            _ => {}
        }
        self.issue(client_id, &client.aco_id, ttl)
    }

    async fn revoke_access_token(&self, token: &str) -> Result<(), AuthError> {
        let claims = self.decode_access_token(token).await?;
        let newly = self.state.lock().revoked.insert(claims.id.clone());
        if newly {
            tracing::info!(token_id = %claims.id, "Revoked test token");
        }
        Ok(())
    }

    async fn validate_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self.decode_access_token(token).await?;
        if claims.is_expired() {
            return Err(AuthError::Expired {
                expired_at: claims.exp,
            });
        }

        let state = self.state.lock();
        if !state.clients.values().any(|c| c.aco_id == claims.aco) {
            return Err(AuthError::UnknownAco { aco: claims.aco });
        }
        if state.revoked.contains(&claims.id) {
            return Err(AuthError::Revoked {
                token_id: claims.id,
            });
        }
        drop(state);

        Ok(claims)
    }

    async fn decode_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        token::decode_verified(token, self.keys.decoding_key())?.into_claims()
    }
}
