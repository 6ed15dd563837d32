//! # Tokenward Core
//!
//! Core library for Tokenward, a multi-tenant token authority.
//!
//! This crate provides:
//! - Domain types for ACOs, users, groups, systems and their credentials
//! - A token authority that signs, validates and revokes RS512 bearer tokens
//! - A credential store for groups, systems, client secrets and public keys
//! - The [`AuthProvider`] abstraction with local and test implementations
//! - In-memory and JSON-file repositories behind the [`Repository`] trait
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tokenward_core::{AuthProvider, LocalProvider, SigningKeys, TokenAuthority, open_repository};
//!
//! async fn issue(client_id: &str) -> Result<String, tokenward_core::AuthError> {
//!     let repo = open_repository(None)?;
//!     let keys = SigningKeys::load("private.pem".as_ref(), "public.pem".as_ref())?;
//!     let provider = LocalProvider::new(TokenAuthority::new(keys, repo.clone()), repo);
//!     let params = tokenward_core::AccessTokenParams::new(client_id, 1);
//!     let issued = provider.request_access_token(params).await?;
//!     Ok(issued.token.expose().to_string())
//! }
//! ```

pub mod credentials;
pub mod error;
pub mod model;
pub mod provider;
pub mod secret;
pub mod store;
pub mod tenant;
pub mod token;
pub mod token_authority;

// Re-export commonly used types at crate root
pub use model::{
    Aco,
    AcoSize,
    EncryptionKey,
    Group,
    GroupData,
    SecretRecord,
    System,
    SystemCredentials,
    SystemPublicKey,
    TokenRecord,
    User,
};

pub use error::{
    AuthError,
    CascadeStep,
    ErrorKind,
    ErrorPayload,
};

pub use secret::Secret;

pub use store::{
    FileRepository,
    MemoryRepository,
    Repository,
    StoreError,
    open_repository,
};

pub use token::{
    Claims,
    IssuedToken,
    DEFAULT_TOKEN_TTL_HOURS,
};

pub use token_authority::{
    SigningKeys,
    TokenAuthority,
};

pub use credentials::{
    CredentialStore,
    RegisterSystem,
};

pub use tenant::TenantDirectory;

pub use provider::{
    AccessTokenParams,
    AuthProvider,
    ClientCredentials,
    ClientParams,
    Environment,
    LocalProvider,
    ProviderKind,
    RegisterClientParams,
    RevocationSummary,
    TestProvider,
    TokenOverrides,
    UpdateClientParams,
};
