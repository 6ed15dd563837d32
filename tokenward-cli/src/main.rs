//! Tokenward CLI
//!
//! Administrative command-line interface for the Tokenward token authority.
//!
//! # Usage
//!
//! ```bash
//! # Create a tenant and a user, then issue a token for the user
//! tokenward create-aco --name "ACO Dev"
//! tokenward create-user --aco-id <ACO_UUID> --name "Dev User" --email dev@example.com
//! tokenward create-token --user-id <USER_UUID>
//!
//! # Register a group's system and rotate its key
//! tokenward create-group --group-id A12345 --name "ACO A12345"
//! tokenward register-system --group-id A12345 --client-name "ACO System A" --public-key-file key.pem
//! tokenward rotate-key --system-id 1 --public-key-file new_key.pem
//! ```

mod config;

use anyhow::{Context, Result, bail};
use chrono::Duration;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenward_client::RemoteProvider;
use tokenward_client::types::DEFAULT_SCOPE;
use tokenward_core::{
    AccessTokenParams, AuthProvider, Claims, ClientParams, CredentialStore, GroupData,
    LocalProvider, ProviderKind, RegisterClientParams, RegisterSystem, Repository, Secret,
    SigningKeys, TenantDirectory, TestProvider, TokenAuthority, open_repository,
};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

use crate::config::CliConfig;

#[derive(Parser)]
#[command(name = "tokenward")]
#[command(about = "Administer tenants, credentials and tokens of the Tokenward token authority")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "TOKENWARD_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an ACO and print its UUID
    CreateAco {
        /// Display name of the ACO
        #[arg(long)]
        name: String,

        /// Use this UUID instead of a random one (e.g. to seed the alpha ACOs)
        #[arg(long)]
        id: Option<String>,
    },

    /// Create a user belonging to an ACO and print its UUID
    CreateUser {
        /// UUID of the owning ACO
        #[arg(long)]
        aco_id: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        email: String,
    },

    /// Issue a token for a user
    CreateToken {
        /// UUID of the user
        #[arg(long)]
        user_id: String,

        /// Token lifetime in hours (defaults to the configured TTL)
        #[arg(long)]
        ttl_hours: Option<i64>,
    },

    /// Revoke a token
    RevokeToken {
        /// The signed token
        token: String,
    },

    /// Validate a token and print its claims as JSON
    ValidateToken {
        /// The signed token
        token: String,
    },

    /// Issue a token for one of the fixed alpha ACOs
    CreateAlphaToken {
        /// Lifetime in whole hours
        #[arg(long)]
        ttl: String,

        /// ACO size: dev, small, medium or large
        #[arg(long)]
        size: String,
    },

    /// Create a group and print its numeric id
    CreateGroup {
        /// JSON file with the full group document
        #[arg(long, conflicts_with_all = ["group_id", "name"])]
        file: Option<PathBuf>,

        /// External group id (e.g. an ACO CMS id)
        #[arg(long, required_unless_present = "file")]
        group_id: Option<String>,

        /// Group name
        #[arg(long)]
        name: Option<String>,
    },

    /// Delete a group with its system, secrets and keys
    DeleteGroup {
        /// Numeric group id
        id: u64,
    },

    /// Register the system of a group and print its credentials
    RegisterSystem {
        /// External id of the owning group
        #[arg(long)]
        group_id: String,

        #[arg(long)]
        client_name: String,

        /// API scope granted to the system
        #[arg(long, default_value = DEFAULT_SCOPE)]
        scope: String,

        /// PEM file with the system's RSA public key
        #[arg(long)]
        public_key_file: PathBuf,

        /// Tracking id recorded with the registration (defaults to the group id)
        #[arg(long)]
        tracking_id: Option<String>,
    },

    /// Register a new public key for a system
    RotateKey {
        /// Numeric system id
        #[arg(long)]
        system_id: u64,

        /// PEM file with the new RSA public key
        #[arg(long)]
        public_key_file: PathBuf,
    },

    /// Replace a system's client secret and print the new one
    ResetCredentials {
        /// Numeric system id
        #[arg(long)]
        system_id: u64,
    },

    /// Register a client for an ACO through the configured provider
    RegisterClient {
        /// UUID of the ACO
        #[arg(long)]
        aco_id: String,

        /// Client name (required by the remote provider)
        #[arg(long)]
        name: Option<String>,

        /// PEM file with the client's RSA public key
        #[arg(long)]
        public_key_file: Option<PathBuf>,

        #[arg(long)]
        tracking_id: Option<String>,
    },

    /// Revoke a client's credentials and issue new ones
    GenerateCredentials {
        #[arg(long)]
        client_id: String,
    },

    /// Revoke every active token of a client
    RevokeClient {
        #[arg(long)]
        client_id: String,
    },

    /// Request an access token for a client
    RequestToken {
        #[arg(long)]
        client_id: String,

        /// Client secret
        #[arg(long, env = "TOKENWARD_CLIENT_SECRET", hide_env_values = true)]
        client_secret: Option<String>,

        /// Token lifetime in hours (defaults to the configured TTL)
        #[arg(long)]
        ttl_hours: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;
    init_logging(&config.log_level, cli.verbose);
    debug!("Loaded configuration from {:?}", config.config_path);

    run(cli.command, &config).await
}

/// Log to stderr so command output on stdout stays scriptable.
fn init_logging(level: &str, verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
        }
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Commands, config: &CliConfig) -> Result<()> {
    match command {
        Commands::CreateAco { name, id } => {
            let tenants = tenant_directory(config)?;
            let aco = match id {
                Some(id) => {
                    let uuid = Uuid::parse_str(id.trim())
                        .with_context(|| format!("Invalid ACO id {:?}", id))?;
                    tenants.create_aco_with_id(uuid, &name).await?
                }
                None => tenants.create_aco(&name).await?,
            };
            println!("{}", aco.uuid);
        }
        Commands::CreateUser {
            aco_id,
            name,
            email,
        } => {
            let user = tenant_directory(config)?
                .create_user(&aco_id, &name, &email)
                .await?;
            println!("{}", user.uuid);
        }
        Commands::CreateToken { user_id, ttl_hours } => {
            let local = local_provider(config)?;
            let user = local.tenants().find_user(&user_id).await?;
            let issued = match ttl_hours {
                Some(hours) => {
                    local
                        .authority()
                        .create_token_with_ttl(&user, hours_to_duration(hours)?)
                        .await?
                }
                None => local.authority().create_token(&user).await?,
            };
            println!("{}", issued.token.expose());
        }
        Commands::RevokeToken { token } => {
            let provider = build_provider(config)?;
            provider.revoke_access_token(&token).await?;
            println!("Token revoked");
        }
        Commands::ValidateToken { token } => {
            let provider = build_provider(config)?;
            let claims = provider.validate_access_token(&token).await?;
            print_json(&claims)?;
        }
        Commands::CreateAlphaToken { ttl, size } => {
            let local = local_provider(config)?;
            let issued = local.authority().create_alpha_token(&ttl, &size).await?;
            print_alpha_token(&issued.claims, &issued.token)?;
        }
        Commands::CreateGroup {
            file,
            group_id,
            name,
        } => {
            let data = match file {
                Some(path) => read_group_file(&path)?,
                None => GroupData {
                    group_id: group_id.unwrap_or_default(),
                    name: name.unwrap_or_default(),
                    ..GroupData::default()
                },
            };
            let group = credential_store(config)?.create_group(data).await?;
            println!("{}", group.id);
        }
        Commands::DeleteGroup { id } => {
            credential_store(config)?.delete_group(id).await?;
            println!("Group {} deleted", id);
        }
        Commands::RegisterSystem {
            group_id,
            client_name,
            scope,
            public_key_file,
            tracking_id,
        } => {
            let local = local_provider(config)?;
            let public_key = read_text(&public_key_file, "public key")?;
            let tracking_id = tracking_id.unwrap_or_else(|| group_id.clone());
            let creds = local
                .register_system(RegisterSystem {
                    group_id,
                    client_name,
                    scope,
                    public_key,
                    tracking_id,
                })
                .await?;
            print_json(&creds)?;
        }
        Commands::RotateKey {
            system_id,
            public_key_file,
        } => {
            let public_key = read_text(&public_key_file, "public key")?;
            let key = credential_store(config)?
                .rotate_public_key(system_id, &public_key)
                .await?;
            println!("Registered key {} for system {}", key.id, system_id);
        }
        Commands::ResetCredentials { system_id } => {
            let creds = credential_store(config)?.reset_credentials(system_id).await?;
            print_json(&creds)?;
        }
        Commands::RegisterClient {
            aco_id,
            name,
            public_key_file,
            tracking_id,
        } => {
            let provider = build_provider(config)?;
            let public_key = match public_key_file {
                Some(path) => Some(read_text(&path, "public key")?),
                None => None,
            };
            let params = RegisterClientParams {
                name: name.unwrap_or_default(),
                public_key,
                tracking_id,
                ..RegisterClientParams::new(aco_id)
            };
            let client_id = provider.register_client(params).await?;
            println!("{}", client_id);
        }
        Commands::GenerateCredentials { client_id } => {
            let provider = build_provider(config)?;
            let creds = provider
                .generate_client_credentials(ClientParams::new(client_id))
                .await?;
            print_json(&json!({
                "client_id": creds.client_id,
                "client_secret": creds.client_secret.as_ref().map(Secret::expose),
                "token": creds.token.as_ref().map(Secret::expose),
                "expires_at": creds.expires_at.map(|at| at.to_rfc3339()),
            }))?;
        }
        Commands::RevokeClient { client_id } => {
            let provider = build_provider(config)?;
            let summary = provider
                .revoke_client_credentials(ClientParams::new(client_id))
                .await?;
            println!(
                "Revoked {} of {} token(s)",
                summary.revoked,
                summary.total
            );
        }
        Commands::RequestToken {
            client_id,
            client_secret,
            ttl_hours,
        } => {
            let provider = build_provider(config)?;
            let mut params = AccessTokenParams::new(
                client_id,
                ttl_hours.unwrap_or(config.token.default_ttl_hours),
            );
            if let Some(secret) = client_secret {
                params = params.with_secret(Secret::new(secret));
            }
            let issued = provider.request_access_token(params).await?;
            println!("{}", issued.token.expose());
        }
    }

    Ok(())
}

fn open_store(config: &CliConfig) -> Result<Arc<dyn Repository>> {
    let path = config.data_file()?;
    open_repository(path).context("Failed to open the data store")
}

fn credential_store(config: &CliConfig) -> Result<CredentialStore> {
    Ok(CredentialStore::new(open_store(config)?))
}

fn tenant_directory(config: &CliConfig) -> Result<TenantDirectory> {
    Ok(TenantDirectory::new(open_store(config)?))
}

fn local_provider(config: &CliConfig) -> Result<LocalProvider> {
    let (private_key, public_key) = config.key_paths()?;
    let keys = SigningKeys::load(private_key, public_key)
        .context("Failed to load the signing keypair")?;

    let repo = open_store(config)?;
    let authority = TokenAuthority::new(keys, repo.clone())
        .with_default_ttl(hours_to_duration(config.token.default_ttl_hours)?);
    Ok(LocalProvider::new(authority, repo))
}

/// Build the one provider this invocation uses.
fn build_provider(config: &CliConfig) -> Result<Arc<dyn AuthProvider>> {
    let provider: Arc<dyn AuthProvider> = match config.provider {
        ProviderKind::Local => Arc::new(local_provider(config)?),
        ProviderKind::Remote => Arc::new(
            RemoteProvider::from_config(&config.remote)
                .context("Failed to configure the remote credential service")?,
        ),
        ProviderKind::Test => {
            let provider = match config.key_paths() {
                Ok((private_key, public_key)) => TestProvider::new(
                    config.environment,
                    SigningKeys::load(private_key, public_key)?,
                )?,
                Err(_) => TestProvider::generate(config.environment)?,
            };
            Arc::new(provider)
        }
    };
    info!(
        provider = provider.kind().as_str(),
        environment = config.environment.as_str(),
        "Using {} provider",
        provider.kind()
    );
    Ok(provider)
}

fn hours_to_duration(hours: i64) -> Result<Duration> {
    if hours <= 0 {
        bail!("TTL must be a positive number of hours, got {}", hours);
    }
    Duration::try_hours(hours).with_context(|| format!("TTL of {} hours is out of range", hours))
}

fn read_text(path: &Path, what: &str) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {} from {:?}", what, path))
}

fn read_group_file(path: &Path) -> Result<GroupData> {
    let contents = read_text(path, "group")?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse group from {:?}", path))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Expiry (RFC 2822), token id and token, one per line.
fn print_alpha_token(claims: &Claims, token: &Secret) -> Result<()> {
    let expires_at = claims
        .expires_at()
        .context("Token expiry is out of range")?;
    println!("{}", expires_at.to_rfc2822());
    println!("{}", claims.id);
    println!("{}", token.expose());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_create_user() {
        let cli = Cli::try_parse_from([
            "tokenward",
            "create-user",
            "--aco-id",
            "0c527d2e-2e8a-4808-b11d-0fa06baf8254",
            "--name",
            "Dev User",
            "--email",
            "dev@example.com",
        ])
        .unwrap();

        match cli.command {
            Commands::CreateUser { aco_id, email, .. } => {
                assert_eq!(aco_id, "0c527d2e-2e8a-4808-b11d-0fa06baf8254");
                assert_eq!(email, "dev@example.com");
            }
            _ => panic!("expected create-user"),
        }
    }

    #[test]
    fn test_register_system_scope_defaults() {
        let cli = Cli::try_parse_from([
            "tokenward",
            "register-system",
            "--group-id",
            "A12345",
            "--client-name",
            "ACO System A",
            "--public-key-file",
            "key.pem",
        ])
        .unwrap();

        match cli.command {
            Commands::RegisterSystem {
                scope, tracking_id, ..
            } => {
                assert_eq!(scope, DEFAULT_SCOPE);
                assert!(tracking_id.is_none());
            }
            _ => panic!("expected register-system"),
        }
    }

    #[test]
    fn test_create_group_needs_id_or_file() {
        assert!(Cli::try_parse_from(["tokenward", "create-group"]).is_err());
        assert!(
            Cli::try_parse_from([
                "tokenward",
                "create-group",
                "--file",
                "group.json",
                "--group-id",
                "A1"
            ])
            .is_err()
        );
    }

    #[test]
    fn test_ttl_must_be_positive() {
        assert!(hours_to_duration(0).is_err());
        assert!(hours_to_duration(-3).is_err());
        assert_eq!(hours_to_duration(2).unwrap(), Duration::hours(2));
    }
}
