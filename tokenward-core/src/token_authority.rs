//! Token authority: signs, verifies and revokes bearer tokens.
//!
//! The authority holds the process-wide RSA keypair and owns the lifecycle
//! of [`TokenRecord`] rows. Keys are loaded once at startup; any failure to
//! read or parse them is a [`AuthError::Configuration`] error.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use rsa::RsaPrivateKey;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AuthError, Problems};
use crate::model::{AcoSize, TokenRecord, User};
use crate::secret::{Secret, hash_token};
use crate::store::Repository;
use crate::token::{self, Claims, DEFAULT_TOKEN_TTL_HOURS, IssuedToken, expiry_after};

const GENERATED_KEY_BITS: usize = 2048;

/// An RSA keypair ready for signing and verification.
#[derive(Clone)]
pub struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    public_pem: String,
}

impl SigningKeys {
    /// Build a keypair from PEM text.
    ///
    /// The private key may be PKCS#1 or PKCS#8; the public key may be SPKI
    /// or PKCS#1. The pair is checked to match.
    pub fn from_pem(private_pem: &[u8], public_pem: &[u8]) -> Result<Self, AuthError> {
        let encoding = EncodingKey::from_rsa_pem(private_pem)
            .map_err(|e| AuthError::config(format!("unable to parse private key: {e}")))?;
        let decoding = DecodingKey::from_rsa_pem(public_pem)
            .map_err(|e| AuthError::config(format!("unable to parse public key: {e}")))?;
        let public_pem = String::from_utf8(public_pem.to_vec())
            .map_err(|_| AuthError::config("public key is not valid UTF-8"))?;

        let keys = Self {
            encoding,
            decoding,
            public_pem,
        };
        keys.check_pair()?;
        Ok(keys)
    }

    /// Read and parse a keypair from PEM files.
    pub fn load(private_path: &Path, public_path: &Path) -> Result<Self, AuthError> {
        let private_pem = std::fs::read(private_path).map_err(|e| {
            AuthError::config(format!(
                "unable to read private key {}: {e}",
                private_path.display()
            ))
        })?;
        let public_pem = std::fs::read(public_path).map_err(|e| {
            AuthError::config(format!(
                "unable to read public key {}: {e}",
                public_path.display()
            ))
        })?;

        let keys = Self::from_pem(&private_pem, &public_pem)?;
        tracing::info!(
            "Loaded signing keys from {} and {}",
            private_path.display(),
            public_path.display()
        );
        Ok(keys)
    }

    /// Generate a fresh 2048-bit keypair. Used by the test provider.
    pub fn generate() -> Result<Self, AuthError> {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, GENERATED_KEY_BITS)
            .map_err(|e| AuthError::config(format!("unable to generate RSA key: {e}")))?;
        let private_pem = private
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| AuthError::config(format!("unable to encode private key: {e}")))?;
        let public_pem = private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AuthError::config(format!("unable to encode public key: {e}")))?;

        Self::from_pem(private_pem.as_bytes(), public_pem.as_bytes())
    }

    pub fn public_key_pem(&self) -> &str {
        &self.public_pem
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }

    fn check_pair(&self) -> Result<(), AuthError> {
        let probe = Claims::new("probe", "probe", "probe", Duration::minutes(1))?;
        let signed = token::sign(&probe, Algorithm::RS256, None, &self.encoding)?;
        token::decode_verified(signed.expose(), &self.decoding)
            .map(|_| ())
            .map_err(|_| AuthError::config("private and public keys do not form a pair"))
    }
}

impl fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeys")
            .field("private", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Issues and checks the tokens of local ACO users.
#[derive(Clone)]
pub struct TokenAuthority {
    keys: Arc<SigningKeys>,
    repo: Arc<dyn Repository>,
    default_ttl: Duration,
}

impl TokenAuthority {
    pub fn new(keys: SigningKeys, repo: Arc<dyn Repository>) -> Self {
        Self {
            keys: Arc::new(keys),
            repo,
            default_ttl: Duration::hours(DEFAULT_TOKEN_TTL_HOURS),
        }
    }

    /// Override the lifetime of tokens issued by [`create_token`](Self::create_token).
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn public_key_pem(&self) -> &str {
        self.keys.public_key_pem()
    }

    /// Sign arbitrary claims with RS512.
    pub fn sign_jwt_token(&self, claims: &Claims) -> Result<Secret, AuthError> {
        token::sign(claims, Algorithm::RS512, None, self.keys.encoding_key())
    }

    /// Issue a default-lifetime token for `user` and persist its row.
    pub async fn create_token(&self, user: &User) -> Result<IssuedToken, AuthError> {
        self.create_token_with_ttl(user, self.default_ttl).await
    }

    pub async fn create_token_with_ttl(
        &self,
        user: &User,
        ttl: Duration,
    ) -> Result<IssuedToken, AuthError> {
        let (issued, record) = self.mint(user, ttl)?;
        self.repo.insert_token(record).await?;

        tracing::info!(
            token_id = %issued.claims.id,
            aco = %user.aco_id,
            "Issued token for user {}",
            user.uuid
        );
        Ok(issued)
    }

    /// Issue a default-lifetime token for `user` and deactivate every other
    /// active token of `user_ids`, in one repository write.
    ///
    /// Returns the new token and the number of tokens deactivated.
    pub async fn reissue_token(
        &self,
        user: &User,
        user_ids: &[Uuid],
    ) -> Result<(IssuedToken, usize), AuthError> {
        let (issued, record) = self.mint(user, self.default_ttl)?;
        let replaced = self.repo.replace_tokens_for_users(user_ids, record).await?;

        tracing::info!(
            token_id = %issued.claims.id,
            aco = %user.aco_id,
            replaced,
            "Reissued token for user {}",
            user.uuid
        );
        Ok((issued, replaced))
    }

    fn mint(&self, user: &User, ttl: Duration) -> Result<(IssuedToken, TokenRecord), AuthError> {
        let token_id = Uuid::new_v4();
        let issued_at = Utc::now();
        let expires_at = expiry_after(issued_at, ttl)?;

        let claims = Claims {
            sub: user.uuid.to_string(),
            aco: user.aco_id.to_string(),
            id: token_id.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            iss: None,
            scp: Vec::new(),
            cid: None,
        };
        let signed = self.sign_jwt_token(&claims)?;

        let record = TokenRecord {
            uuid: token_id,
            user_id: user.uuid,
            aco_id: user.aco_id,
            value_hash: hash_token(signed.expose()),
            active: true,
            issued_at,
            expires_at,
        };
        Ok((
            IssuedToken {
                token: signed,
                claims,
            },
            record,
        ))
    }

    /// Decode a token and check its signature, ignoring expiry.
    pub fn decode_token(&self, token: &str) -> Result<Claims, AuthError> {
        token::decode_verified(token, self.keys.decoding_key())?.into_claims()
    }

    /// Deactivate the token's row.
    ///
    /// Revoking an already-inactive or unknown token succeeds without effect.
    pub async fn revoke_token(&self, token: &str) -> Result<(), AuthError> {
        let raw = token::decode_verified(token, self.keys.decoding_key())?;
        let Some(id) = raw.id.filter(|id| !id.trim().is_empty()) else {
            return Err(AuthError::MissingClaims { claims: vec!["id"] });
        };

        match Uuid::parse_str(&id) {
            Ok(uuid) => {
                self.revoke_token_by_id(uuid).await?;
            }
            Err(_) => {
                tracing::debug!("Token id {} is not a UUID; nothing to revoke", id);
            }
        }
        Ok(())
    }

    /// Deactivate a token row by id.
    ///
    /// Returns `true` when the token was active and is now revoked.
    pub async fn revoke_token_by_id(&self, id: Uuid) -> Result<bool, AuthError> {
        let revoked = self.repo.deactivate_token(id).await?;
        if revoked {
            tracing::info!(token_id = %id, "Revoked token");
        } else {
            tracing::debug!(token_id = %id, "Token already inactive or unknown");
        }
        Ok(revoked)
    }

    /// Full validation: signature, required claims, expiry, ACO, active row.
    ///
    /// Each check fails with its own error kind and the checks run in that
    /// order.
    pub async fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self.decode_token(token)?;

        if claims.is_expired() {
            return Err(AuthError::Expired {
                expired_at: claims.exp,
            });
        }

        let aco_exists = match Uuid::parse_str(&claims.aco) {
            Ok(aco_id) => self.repo.get_aco(aco_id).await?.is_some(),
            Err(_) => false,
        };
        if !aco_exists {
            return Err(AuthError::UnknownAco { aco: claims.aco });
        }

        let active = match Uuid::parse_str(&claims.id) {
            Ok(token_id) => self
                .repo
                .get_token(token_id)
                .await?
                .is_some_and(|record| record.active),
            Err(_) => false,
        };
        if !active {
            return Err(AuthError::Revoked {
                token_id: claims.id,
            });
        }

        Ok(claims)
    }

    /// Issue a token for the first user of one of the fixed alpha ACOs.
    ///
    /// `ttl_hours` must be a positive whole number of hours and `size` one of
    /// `dev`, `small`, `medium` or `large` (any case). Both are checked before
    /// anything is looked up or written.
    pub async fn create_alpha_token(
        &self,
        ttl_hours: &str,
        size: &str,
    ) -> Result<IssuedToken, AuthError> {
        let mut problems = Problems::new();

        let ttl = match ttl_hours.trim().parse::<i64>() {
            Ok(hours) if hours > 0 => Duration::try_hours(hours),
            _ => None,
        };
        problems.check(
            ttl.is_some(),
            format!("invalid TTL '{ttl_hours}': expected a positive number of hours"),
        );

        let size = match size.parse::<AcoSize>() {
            Ok(size) => Some(size),
            Err(err) => {
                problems.push(match err {
                    AuthError::Validation { problems } => problems.join("; "),
                    other => other.to_string(),
                });
                None
            }
        };
        problems.finish()?;

        let (Some(ttl), Some(size)) = (ttl, size) else {
            return Err(AuthError::invalid("invalid alpha token request"));
        };

        let aco_id = size.aco_uuid();
        if self.repo.get_aco(aco_id).await?.is_none() {
            return Err(AuthError::not_found("aco", aco_id));
        }
        let user = self
            .repo
            .users_for_aco(aco_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AuthError::not_found("user for aco", aco_id))?;

        self.create_token_with_ttl(&user, ttl).await
    }
}

impl fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}
