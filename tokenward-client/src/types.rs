//! Request and response bodies of the remote credential service.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokenward_core::Secret;

/// Scope requested for every group created through the remote provider.
pub const DEFAULT_SCOPE: &str = "bcda-api";

#[derive(Debug, Clone, Serialize)]
pub struct CreateGroupRequest {
    pub id: String,
    pub name: String,
    pub scopes: Vec<String>,
}

impl CreateGroupRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            scopes: vec![DEFAULT_SCOPE.to_string()],
        }
    }
}

/// A group as returned by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RemoteGroup {
    /// Numeric row id used in `/group/{id}` paths.
    #[serde(default, alias = "ID")]
    pub id: u64,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub xdata: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSystemRequest {
    pub client_name: String,
    pub group_id: String,
    pub scope: String,
    pub public_key: String,
    pub tracking_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: Secret,
    #[serde(default)]
    pub token_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntrospectRequest<'a> {
    pub token: &'a str,
}

/// Introspection result (RFC 7662).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntrospectResponse {
    pub active: bool,
    /// Expiry as the service records it, in seconds since the epoch.
    #[serde(default)]
    pub exp: Option<i64>,
}

impl IntrospectResponse {
    /// The expiry the service reports, when it has passed.
    pub fn expired_at(&self) -> Option<i64> {
        self.exp.filter(|exp| *exp < Utc::now().timestamp())
    }
}
