use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokenward_core::{AuthError, Secret};
use tracing::warn;
use url::Url;

/// Request timeout used when none is configured.
pub const DEFAULT_TIMEOUT_MS: u64 = 500;

/// Connection settings for the remote credential service.
///
/// Usually read from the `[remote]` section of the Tokenward config file and
/// then overlaid with environment variables (see [`RemoteConfig::apply_env`]).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the admin API.
    pub url: Option<String>,
    /// Base URL serving `/token` and `/introspect`. Defaults to `url`.
    pub public_url: Option<String>,
    /// Present a client certificate and trust `ca_file`.
    pub use_tls: bool,
    pub client_cert_file: Option<PathBuf>,
    pub client_key_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
    /// Credentials this service uses for `/introspect`.
    pub client_id: Option<String>,
    pub client_secret: Option<Secret>,
}

/// Each setting with its Tokenward variable and the legacy variable honored
/// when the first is unset.
const ENV_URL: (&str, &str) = ("TOKENWARD_REMOTE_URL", "SSAS_URL");
const ENV_PUBLIC_URL: (&str, &str) = ("TOKENWARD_REMOTE_PUBLIC_URL", "SSAS_PUBLIC_URL");
const ENV_USE_TLS: (&str, &str) = ("TOKENWARD_REMOTE_USE_TLS", "SSAS_USE_TLS");
const ENV_CERT: (&str, &str) = ("TOKENWARD_REMOTE_CLIENT_CERT_FILE", "SSAS_CLIENT_CERT_FILE");
const ENV_KEY: (&str, &str) = ("TOKENWARD_REMOTE_CLIENT_KEY_FILE", "SSAS_CLIENT_KEY_FILE");
const ENV_CA: (&str, &str) = ("TOKENWARD_REMOTE_CA_FILE", "SSAS_CLIENT_CA_FILE");
const ENV_TIMEOUT: (&str, &str) = ("TOKENWARD_REMOTE_TIMEOUT_MS", "SSAS_TIMEOUT_MS");
const ENV_CLIENT_ID: (&str, &str) = ("TOKENWARD_REMOTE_CLIENT_ID", "BCDA_SSAS_CLIENT_ID");
const ENV_SECRET: (&str, &str) = ("TOKENWARD_REMOTE_CLIENT_SECRET", "BCDA_SSAS_SECRET");

impl RemoteConfig {
    /// Build a configuration from the process environment alone.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|name| std::env::var(name).ok());
        config
    }

    /// Overlay settings found through `lookup` onto this configuration.
    ///
    /// An unparsable timeout is ignored (and logged) so the default applies.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |(primary, legacy): (&str, &str)| {
            lookup(primary)
                .or_else(|| lookup(legacy))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(url) = get(ENV_URL) {
            self.url = Some(url);
        }
        if let Some(url) = get(ENV_PUBLIC_URL) {
            self.public_url = Some(url);
        }
        if let Some(flag) = get(ENV_USE_TLS) {
            self.use_tls = flag.eq_ignore_ascii_case("true");
        }
        if let Some(path) = get(ENV_CERT) {
            self.client_cert_file = Some(PathBuf::from(path));
        }
        if let Some(path) = get(ENV_KEY) {
            self.client_key_file = Some(PathBuf::from(path));
        }
        if let Some(path) = get(ENV_CA) {
            self.ca_file = Some(PathBuf::from(path));
        }
        if let Some(raw) = get(ENV_TIMEOUT) {
            match raw.parse::<u64>() {
                Ok(ms) => self.timeout_ms = Some(ms),
                Err(_) => warn!("Ignoring unparsable remote timeout '{}'", raw),
            }
        }
        if let Some(id) = get(ENV_CLIENT_ID) {
            self.client_id = Some(id);
        }
        if let Some(secret) = get(ENV_SECRET) {
            self.client_secret = Some(Secret::new(secret));
        }
    }

    /// Per-request timeout, defaulting to 500 ms.
    pub fn timeout(&self) -> Duration {
        match self.timeout_ms {
            Some(ms) => Duration::from_millis(ms),
            None => {
                warn!("Remote timeout not set; using default of {} ms", DEFAULT_TIMEOUT_MS);
                Duration::from_millis(DEFAULT_TIMEOUT_MS)
            }
        }
    }

    /// The admin base URL. Required.
    pub fn admin_url(&self) -> Result<Url, AuthError> {
        let raw = self
            .url
            .as_deref()
            .ok_or_else(|| AuthError::config("remote url is not set (TOKENWARD_REMOTE_URL or SSAS_URL)"))?;
        parse_base(raw)
    }

    /// The public base URL, falling back to the admin URL.
    pub fn public_url(&self) -> Result<Url, AuthError> {
        match self.public_url.as_deref() {
            Some(raw) => parse_base(raw),
            None => self.admin_url(),
        }
    }
}

fn parse_base(raw: &str) -> Result<Url, AuthError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| AuthError::config(format!("invalid remote url '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AuthError::config(format!(
            "invalid remote url '{raw}': expected http or https"
        )));
    }
    Ok(url)
}
