//! Tokenward Client Library
//!
//! Client for a remote credential service speaking the Tokenward admin and
//! token protocol, and the [`RemoteProvider`] that exposes it as an
//! [`AuthProvider`](tokenward_core::AuthProvider).
//!
//! # Overview
//!
//! The admin API (groups, systems, credentials, token revocation) is served
//! from one base URL; `/token` and `/introspect` from a public base URL.
//! Connections can use mutual TLS with a client certificate and a private CA.
//!
//! # Quick Start
//!
//! ```no_run
//! use tokenward_client::{RemoteConfig, RemoteProvider};
//! use tokenward_core::{AccessTokenParams, AuthProvider, Secret};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tokenward_core::AuthError> {
//!     let provider = RemoteProvider::from_config(&RemoteConfig::from_env())?;
//!
//!     let params = AccessTokenParams::new("my-client", 1).with_secret(Secret::new("my-secret"));
//!     let issued = provider.request_access_token(params).await?;
//!     println!("token expires at {:?}", issued.expires_at());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Environment Variables
//!
//! Each setting can be given with a `TOKENWARD_REMOTE_` variable or its
//! legacy name:
//!
//! - `TOKENWARD_REMOTE_URL` / `SSAS_URL` - admin base URL
//! - `TOKENWARD_REMOTE_PUBLIC_URL` / `SSAS_PUBLIC_URL` - public base URL
//! - `TOKENWARD_REMOTE_USE_TLS` / `SSAS_USE_TLS` - `true` enables mutual TLS
//! - `TOKENWARD_REMOTE_CLIENT_CERT_FILE` / `SSAS_CLIENT_CERT_FILE`
//! - `TOKENWARD_REMOTE_CLIENT_KEY_FILE` / `SSAS_CLIENT_KEY_FILE`
//! - `TOKENWARD_REMOTE_CA_FILE` / `SSAS_CLIENT_CA_FILE`
//! - `TOKENWARD_REMOTE_TIMEOUT_MS` / `SSAS_TIMEOUT_MS` - defaults to 500
//! - `TOKENWARD_REMOTE_CLIENT_ID` / `BCDA_SSAS_CLIENT_ID`
//! - `TOKENWARD_REMOTE_CLIENT_SECRET` / `BCDA_SSAS_SECRET`

mod client;
pub mod config;
mod provider;
pub mod types;

pub use client::RemoteServiceClient;
pub use config::{DEFAULT_TIMEOUT_MS, RemoteConfig};
pub use provider::RemoteProvider;
pub use types::{
    CreateGroupRequest, CreateSystemRequest, IntrospectResponse, RemoteGroup, TokenResponse,
};
