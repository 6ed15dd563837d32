//! CLI configuration handling.

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokenward_client::RemoteConfig;
use tokenward_core::{DEFAULT_TOKEN_TTL_HOURS, Environment, FileRepository, ProviderKind};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Which provider handles client and token commands.
    pub provider: ProviderKind,

    pub environment: Environment,

    pub keys: KeysConfig,

    pub store: StoreConfig,

    pub token: TokenConfig,

    pub remote: RemoteConfig,

    /// Logging level, used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,
}

/// PEM files of the signing keypair.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    pub private_key: Option<PathBuf>,
    pub public_key: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON data file. Defaults to the platform data directory.
    pub path: Option<PathBuf>,
    /// Keep rows in memory only.
    pub in_memory: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub default_ttl_hours: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            default_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
        }
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Local,
            environment: Environment::Development,
            keys: KeysConfig::default(),
            store: StoreConfig::default(),
            token: TokenConfig::default(),
            remote: RemoteConfig::default(),
            log_level: "info".to_string(),
            config_path: PathBuf::new(),
        }
    }
}

impl CliConfig {
    /// Overlay `TOKENWARD_*` settings found through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(provider) = get("TOKENWARD_PROVIDER") {
            self.provider = provider
                .parse()
                .with_context(|| format!("Invalid TOKENWARD_PROVIDER {:?}", provider))?;
        }
        if let Some(env) = get("TOKENWARD_ENVIRONMENT") {
            self.environment = env
                .parse()
                .with_context(|| format!("Invalid TOKENWARD_ENVIRONMENT {:?}", env))?;
        }
        if let Some(path) = get("TOKENWARD_PRIVATE_KEY_FILE") {
            self.keys.private_key = Some(PathBuf::from(path));
        }
        if let Some(path) = get("TOKENWARD_PUBLIC_KEY_FILE") {
            self.keys.public_key = Some(PathBuf::from(path));
        }
        if let Some(path) = get("TOKENWARD_DATA_FILE") {
            self.store.path = Some(PathBuf::from(path));
        }
        if let Some(hours) = get("TOKENWARD_TOKEN_TTL_HOURS") {
            self.token.default_ttl_hours = hours
                .trim()
                .parse()
                .with_context(|| format!("Invalid TOKENWARD_TOKEN_TTL_HOURS {:?}", hours))?;
        }
        if let Some(level) = get("TOKENWARD_LOG_LEVEL") {
            self.log_level = level;
        }

        self.remote.apply_env(&lookup);
        Ok(())
    }

    /// The data file of the file-backed repository, or `None` for memory.
    pub fn data_file(&self) -> Result<Option<PathBuf>> {
        if self.store.in_memory {
            return Ok(None);
        }
        match &self.store.path {
            Some(path) => Ok(Some(path.clone())),
            None => Ok(Some(
                FileRepository::default_path().context("Failed to determine data directory")?,
            )),
        }
    }

    /// Both key paths, or an error naming what is missing.
    pub fn key_paths(&self) -> Result<(&Path, &Path)> {
        match (&self.keys.private_key, &self.keys.public_key) {
            (Some(private), Some(public)) => Ok((private, public)),
            _ => bail!(
                "Signing keys are not configured; set [keys] private_key and public_key \
                 or TOKENWARD_PRIVATE_KEY_FILE and TOKENWARD_PUBLIC_KEY_FILE"
            ),
        }
    }
}

/// Load configuration from `explicit`, or the default location if it exists,
/// then apply environment overrides.
pub fn load_config(explicit: Option<&Path>) -> Result<CliConfig> {
    let config_path = match explicit {
        Some(path) => path.to_path_buf(),
        None => default_config_path(),
    };

    let mut config = if explicit.is_some() || config_path.exists() {
        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", config_path))?
    } else {
        CliConfig::default()
    };

    config.apply_env(|name| std::env::var(name).ok())?;
    config.config_path = config_path;
    Ok(config)
}

fn default_config_path() -> PathBuf {
    ProjectDirs::from("dev", "tokenward", "tokenward")
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("tokenward.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CliConfig::default();
        assert_eq!(config.provider, ProviderKind::Local);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.token.default_ttl_hours, 72);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_parses_toml_sections() {
        let config: CliConfig = toml::from_str(
            r#"
            provider = "remote"
            environment = "staging"
            log_level = "debug"

            [keys]
            private_key = "/etc/tokenward/private.pem"
            public_key = "/etc/tokenward/public.pem"

            [store]
            path = "/var/lib/tokenward/data.json"

            [token]
            default_ttl_hours = 24

            [remote]
            url = "https://ssas.example.com:3004"
            public_url = "https://ssas.example.com:3003"
            timeout_ms = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.provider, ProviderKind::Remote);
        assert_eq!(config.environment, Environment::Staging);
        assert_eq!(config.token.default_ttl_hours, 24);
        assert_eq!(
            config.data_file().unwrap(),
            Some(PathBuf::from("/var/lib/tokenward/data.json"))
        );
        assert!(config.key_paths().is_ok());
        assert_eq!(config.remote.timeout_ms, Some(1000));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = CliConfig::default();
        config
            .apply_env(lookup(&[
                ("TOKENWARD_PROVIDER", "test"),
                ("TOKENWARD_ENVIRONMENT", "test"),
                ("TOKENWARD_TOKEN_TTL_HOURS", "5"),
                ("SSAS_URL", "http://ssas:3004"),
            ]))
            .unwrap();

        assert_eq!(config.provider, ProviderKind::Test);
        assert_eq!(config.environment, Environment::Test);
        assert_eq!(config.token.default_ttl_hours, 5);
        assert_eq!(config.remote.url.as_deref(), Some("http://ssas:3004"));
    }

    #[test]
    fn test_invalid_env_value_is_error() {
        let mut config = CliConfig::default();
        assert!(config.apply_env(lookup(&[("TOKENWARD_PROVIDER", "okta")])).is_err());
        assert!(
            config
                .apply_env(lookup(&[("TOKENWARD_TOKEN_TTL_HOURS", "soon")]))
                .is_err()
        );
    }

    #[test]
    fn test_missing_keys_are_reported() {
        let err = CliConfig::default().key_paths().unwrap_err();
        assert!(err.to_string().contains("TOKENWARD_PRIVATE_KEY_FILE"));
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "provider = \"test\"\n[store]\nin_memory = true\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.config_path, path);
        assert_eq!(config.data_file().unwrap(), None);
    }
}
