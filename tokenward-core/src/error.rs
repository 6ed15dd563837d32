//! Error taxonomy shared by every Tokenward component.
//!
//! Callers match on [`AuthError::kind`] rather than on individual variants:
//! the kind is stable, while variants carry whatever detail is useful for
//! diagnostics (upstream status and body, the cascade step that failed, ...).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::store::StoreError;

/// Stable classification of an [`AuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    InvalidSignature,
    MissingClaims,
    Expired,
    UnknownAco,
    Revoked,
    InvalidKey,
    Unsupported,
    Remote,
    Transport,
    Configuration,
    Storage,
    CascadeFailed,
    PartialRevocation,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidSignature => "invalid_signature",
            ErrorKind::MissingClaims => "missing_claims",
            ErrorKind::Expired => "expired",
            ErrorKind::UnknownAco => "unknown_aco",
            ErrorKind::Revoked => "revoked",
            ErrorKind::InvalidKey => "invalid_key",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Remote => "remote",
            ErrorKind::Transport => "transport",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Storage => "storage",
            ErrorKind::CascadeFailed => "cascade_failed",
            ErrorKind::PartialRevocation => "partial_revocation",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The child-before-parent steps of a group deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStep {
    FindSystems,
    DeleteEncryptionKeys,
    DeleteSecrets,
    DeleteSystems,
    DeleteGroup,
}

impl fmt::Display for CascadeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            CascadeStep::FindSystems => "find associated systems",
            CascadeStep::DeleteEncryptionKeys => "delete encryption keys",
            CascadeStep::DeleteSecrets => "delete secrets",
            CascadeStep::DeleteSystems => "delete systems",
            CascadeStep::DeleteGroup => "delete group",
        };
        f.write_str(step)
    }
}

/// Error type returned by every core operation.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed input. Lists every problem found, not just the first.
    #[error("invalid input: {}", .problems.join("; "))]
    Validation { problems: Vec<String> },

    /// No matching row.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// No ACO or client exists for the given client id.
    #[error("no client found for client id {client_id}")]
    ClientNotFound { client_id: String },

    /// The ACO exists but has never registered a client.
    #[error("ACO {aco} does not have a registered client")]
    NoRegisteredClient { aco: String },

    /// A unique key is already taken.
    #[error("{entity} already exists: {key}")]
    Conflict { entity: &'static str, key: String },

    /// The token could not be decoded or its signature did not verify.
    #[error("invalid token signature: {reason}")]
    InvalidSignature { reason: String },

    /// One or more of the required claims are absent or empty.
    #[error("token is missing required claims: {}", .claims.join(", "))]
    MissingClaims { claims: Vec<&'static str> },

    /// The `exp` claim is in the past.
    #[error("token expired at {expired_at}")]
    Expired { expired_at: i64 },

    /// The `aco` claim references an ACO that does not exist.
    #[error("token references unknown ACO {aco}")]
    UnknownAco { aco: String },

    /// Structurally valid, but no longer (or never) active.
    #[error("token {token_id} is not active")]
    Revoked { token_id: String },

    /// Key material that does not parse as an RSA public key.
    #[error("invalid public key: {reason}")]
    InvalidKey { reason: String },

    /// The active backend has no way to perform the operation.
    #[error("{operation} is not supported by the {backend} provider")]
    Unsupported {
        operation: &'static str,
        backend: &'static str,
    },

    /// The remote service answered with an unexpected status.
    #[error("{method} {path} returned {status}: {body}")]
    Remote {
        method: String,
        path: String,
        status: u16,
        body: String,
    },

    /// The remote service answered with a body that could not be decoded.
    #[error("{method} {path} returned an unreadable body: {message}")]
    RemoteDecode {
        method: String,
        path: String,
        message: String,
    },

    /// The request never produced a response.
    #[error("{method} {path} failed: {message}")]
    Transport {
        method: String,
        path: String,
        timed_out: bool,
        message: String,
    },

    /// Missing or unusable configuration or key material.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The persistence layer failed.
    #[error("storage error: {0}")]
    Storage(StoreError),

    /// A group deletion stopped at `step`; later steps were not attempted.
    #[error("group deletion aborted at step '{step}': {source}")]
    CascadeFailed {
        step: CascadeStep,
        #[source]
        source: StoreError,
    },

    /// A bulk revocation stopped at the first failing token.
    #[error("{revoked} of {total} token(s) revoked before failure: {reason}")]
    PartialRevocation {
        revoked: usize,
        total: usize,
        reason: String,
    },

    /// Token signing failed.
    #[error("token signing failed: {message}")]
    Signing { message: String },
}

impl AuthError {
    /// Shorthand for a single-problem validation error.
    pub fn invalid(problem: impl Into<String>) -> Self {
        AuthError::Validation {
            problems: vec![problem.into()],
        }
    }

    pub fn not_found(entity: &'static str, key: impl fmt::Display) -> Self {
        AuthError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        AuthError::Configuration {
            message: message.into(),
        }
    }

    /// The stable classification presented to callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Validation { .. } => ErrorKind::Validation,
            AuthError::NotFound { .. }
            | AuthError::ClientNotFound { .. }
            | AuthError::NoRegisteredClient { .. } => ErrorKind::NotFound,
            AuthError::Conflict { .. } => ErrorKind::Conflict,
            AuthError::InvalidSignature { .. } => ErrorKind::InvalidSignature,
            AuthError::MissingClaims { .. } => ErrorKind::MissingClaims,
            AuthError::Expired { .. } => ErrorKind::Expired,
            AuthError::UnknownAco { .. } => ErrorKind::UnknownAco,
            AuthError::Revoked { .. } => ErrorKind::Revoked,
            AuthError::InvalidKey { .. } => ErrorKind::InvalidKey,
            AuthError::Unsupported { .. } => ErrorKind::Unsupported,
            AuthError::Remote { status: 404, .. } => ErrorKind::NotFound,
            AuthError::Remote { .. } | AuthError::RemoteDecode { .. } => ErrorKind::Remote,
            AuthError::Transport { .. } => ErrorKind::Transport,
            AuthError::Configuration { .. } => ErrorKind::Configuration,
            AuthError::Storage(_) => ErrorKind::Storage,
            AuthError::CascadeFailed { .. } => ErrorKind::CascadeFailed,
            AuthError::PartialRevocation { .. } => ErrorKind::PartialRevocation,
            AuthError::Signing { .. } => ErrorKind::Internal,
        }
    }

    /// Convert into the payload handed back across the dispatch boundary.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, key } => AuthError::NotFound { entity, key },
            StoreError::Duplicate { entity, key } => AuthError::Conflict { entity, key },
            other => AuthError::Storage(other),
        }
    }
}

/// Serializable error body for the dispatch layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

/// Collects every validation problem before failing.
#[derive(Debug, Default)]
pub struct Problems(Vec<String>);

impl Problems {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `problem` unless `ok` holds.
    pub fn check(&mut self, ok: bool, problem: impl Into<String>) -> &mut Self {
        if !ok {
            self.0.push(problem.into());
        }
        self
    }

    /// Record a problem when `value` is blank.
    pub fn require(&mut self, value: &str, field: &str) -> &mut Self {
        self.check(!value.trim().is_empty(), format!("{field} must be provided"))
    }

    pub fn push(&mut self, problem: impl Into<String>) -> &mut Self {
        self.0.push(problem.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn finish(self) -> Result<(), AuthError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(AuthError::Validation { problems: self.0 })
        }
    }
}
