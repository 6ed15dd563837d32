//! Bearer token format.
//!
//! This module provides:
//! - [`Claims`] - The claim set carried by every Tokenward token
//! - [`RawClaims`] - Claims as decoded, before required claims are checked
//! - [`IssuedToken`] - A freshly signed token with its claims
//! - signing and decoding helpers over `jsonwebtoken`
//!
//! Tokens are JWTs signed with RS256 or RS512. The required claims are
//! `sub`, `aco`, `id`, `iat` and `exp`; remote and test tokens additionally
//! carry `scp` and `cid`.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::secret::Secret;

/// Lifetime of a token when none is requested.
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 72;

/// Claims of a Tokenward token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user (local) or client (remote/test) the token is for.
    pub sub: String,
    /// UUID of the owning ACO.
    pub aco: String,
    /// Token id; matches the persisted token row.
    pub id: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scp: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

impl Claims {
    /// Claims issued now and valid for `ttl`.
    pub fn new(
        sub: impl Into<String>,
        aco: impl Into<String>,
        id: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self, AuthError> {
        let issued_at = Utc::now();
        let expires_at = expiry_after(issued_at, ttl)?;
        Ok(Self {
            sub: sub.into(),
            aco: aco.into(),
            id: id.into(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            iss: None,
            scp: Vec::new(),
            cid: None,
        })
    }

    pub fn with_issuer(mut self, iss: impl Into<String>) -> Self {
        self.iss = Some(iss.into());
        self
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scp = scopes;
        self
    }

    pub fn with_client_id(mut self, cid: impl Into<String>) -> Self {
        self.cid = Some(cid.into());
        self
    }

    /// Expiry as a timestamp, if representable.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }

    pub fn is_expired(&self) -> bool {
        self.exp < Utc::now().timestamp()
    }
}

/// Claims as found in a token, before the required ones are checked.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub aco: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub scp: Vec<String>,
    #[serde(default)]
    pub cid: Option<String>,
}

impl RawClaims {
    /// Check the required claims, reporting every missing one at once.
    pub fn into_claims(self) -> Result<Claims, AuthError> {
        fn text(value: Option<String>) -> Option<String> {
            value.filter(|v| !v.trim().is_empty())
        }

        let sub = text(self.sub);
        let aco = text(self.aco);
        let id = text(self.id);

        let mut missing = Vec::new();
        if sub.is_none() {
            missing.push("sub");
        }
        if aco.is_none() {
            missing.push("aco");
        }
        if id.is_none() {
            missing.push("id");
        }
        if self.iat.is_none() {
            missing.push("iat");
        }
        if self.exp.is_none() {
            missing.push("exp");
        }

        match (sub, aco, id, self.iat, self.exp) {
            (Some(sub), Some(aco), Some(id), Some(iat), Some(exp)) => Ok(Claims {
                sub,
                aco,
                id,
                iat,
                exp,
                iss: self.iss,
                scp: self.scp,
                cid: self.cid,
            }),
            _ => Err(AuthError::MissingClaims { claims: missing }),
        }
    }
}

/// A signed token and the claims it carries.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: Secret,
    pub claims: Claims,
}

impl IssuedToken {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.claims.expires_at()
    }
}

/// `now + ttl`, rejecting TTLs that overflow the calendar.
pub(crate) fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, AuthError> {
    now.checked_add_signed(ttl)
        .ok_or_else(|| AuthError::invalid(format!("token lifetime of {ttl} is out of range")))
}

/// Sign `claims` with the given algorithm and optional key id.
pub fn sign(
    claims: &Claims,
    algorithm: Algorithm,
    kid: Option<&str>,
    key: &EncodingKey,
) -> Result<Secret, AuthError> {
    let mut header = Header::new(algorithm);
    header.kid = kid.map(str::to_string);
    encode(&header, claims, key)
        .map(Secret::new)
        .map_err(|e| AuthError::Signing {
            message: e.to_string(),
        })
}

/// Decode a token, verifying its RS256/RS512 signature but not its freshness.
pub fn decode_verified(token: &str, key: &DecodingKey) -> Result<RawClaims, AuthError> {
    let mut validation = Validation::new(Algorithm::RS512);
    validation.algorithms = vec![Algorithm::RS256, Algorithm::RS512];
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<RawClaims>(token, key, &validation)
        .map(|data| data.claims)
        .map_err(|e| AuthError::InvalidSignature {
            reason: e.to_string(),
        })
}

/// Decode a token without checking its signature.
///
/// Only for reading routing information (such as the token id) out of tokens
/// whose signature some other party verifies.
pub fn insecure_decode(token: &str) -> Result<RawClaims, AuthError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<RawClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| AuthError::InvalidSignature {
            reason: format!("malformed token: {e}"),
        })
}
