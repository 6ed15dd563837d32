use reqwest::{Certificate, Client, Identity, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::path::Path;
use tokenward_core::{AuthError, GroupData, Secret, SystemCredentials, SystemPublicKey};
use tracing::{debug, info};
use url::Url;

use crate::config::RemoteConfig;
use crate::types::{
    CreateGroupRequest, CreateSystemRequest, IntrospectRequest, IntrospectResponse, RemoteGroup,
    TokenResponse,
};

/// Which base URL a request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Base {
    Admin,
    Public,
}

/// HTTP client for the remote credential service.
///
/// Each call is a single request bounded by the configured timeout. A status
/// other than the endpoint's documented success status is an error carrying
/// the method, path, status and body; nothing is retried.
#[derive(Debug, Clone)]
pub struct RemoteServiceClient {
    http: Client,
    admin_url: Url,
    public_url: Url,
    service_id: Option<String>,
    service_secret: Option<Secret>,
}

impl RemoteServiceClient {
    /// Build a client from configuration.
    ///
    /// With `use_tls` set, the client certificate, its key and the CA bundle
    /// must all be configured and readable.
    pub fn new(config: &RemoteConfig) -> Result<Self, AuthError> {
        let admin_url = config.admin_url()?;
        let public_url = config.public_url()?;

        let mut builder = Client::builder().timeout(config.timeout());
        if config.use_tls {
            let (cert, key, ca) = match (
                &config.client_cert_file,
                &config.client_key_file,
                &config.ca_file,
            ) {
                (Some(cert), Some(key), Some(ca)) => (cert, key, ca),
                _ => {
                    return Err(AuthError::config(
                        "TLS is enabled but the client certificate, key or CA file is not set",
                    ));
                }
            };

            let mut identity_pem = read_pem(cert, "client certificate")?;
            identity_pem.extend_from_slice(b"\n");
            identity_pem.extend(read_pem(key, "client key")?);
            let identity = Identity::from_pem(&identity_pem)
                .map_err(|e| AuthError::config(format!("invalid client certificate or key: {e}")))?;
            let ca = Certificate::from_pem(&read_pem(ca, "CA bundle")?)
                .map_err(|e| AuthError::config(format!("invalid CA bundle: {e}")))?;

            builder = builder
                .use_rustls_tls()
                .identity(identity)
                .add_root_certificate(ca);
            info!("Using mutual TLS for the remote credential service");
        }

        let http = builder
            .build()
            .map_err(|e| AuthError::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            admin_url,
            public_url,
            service_id: config.client_id.clone(),
            service_secret: config.client_secret.clone(),
        })
    }

    pub fn admin_url(&self) -> &Url {
        &self.admin_url
    }

    pub fn public_url(&self) -> &Url {
        &self.public_url
    }

    /// `POST /group`, expecting 201.
    pub async fn create_group(&self, id: &str, name: &str) -> Result<RemoteGroup, AuthError> {
        let body = CreateGroupRequest::new(id, name);
        self.call(Method::POST, Base::Admin, "/group", StatusCode::CREATED, |req| {
            req.json(&body)
        })
        .await
    }

    /// `PUT /group/{id}`, expecting 200.
    pub async fn update_group(&self, id: u64, data: &GroupData) -> Result<RemoteGroup, AuthError> {
        let path = format!("/group/{id}");
        self.call(Method::PUT, Base::Admin, &path, StatusCode::OK, |req| {
            req.json(data)
        })
        .await
    }

    /// `DELETE /group/{id}`, expecting 200.
    pub async fn delete_group(&self, id: u64) -> Result<(), AuthError> {
        let path = format!("/group/{id}");
        self.send(Method::DELETE, Base::Admin, &path, StatusCode::OK, |req| req)
            .await
            .map(|_| ())
    }

    /// `POST /system`, expecting 201.
    pub async fn create_system(
        &self,
        request: &CreateSystemRequest,
    ) -> Result<SystemCredentials, AuthError> {
        self.call(Method::POST, Base::Admin, "/system", StatusCode::CREATED, |req| {
            req.json(request)
        })
        .await
    }

    /// `GET /system/{id}/key`, expecting 200.
    pub async fn get_public_key(&self, system_id: &str) -> Result<SystemPublicKey, AuthError> {
        let path = format!("/system/{system_id}/key");
        self.call(Method::GET, Base::Admin, &path, StatusCode::OK, |req| req)
            .await
    }

    /// `PUT /system/{id}/credentials`, expecting 201.
    pub async fn reset_credentials(&self, system_id: &str) -> Result<SystemCredentials, AuthError> {
        let path = format!("/system/{system_id}/credentials");
        self.call(Method::PUT, Base::Admin, &path, StatusCode::CREATED, |req| req)
            .await
    }

    /// `DELETE /system/{id}/credentials`, expecting 200.
    pub async fn delete_credentials(&self, system_id: &str) -> Result<(), AuthError> {
        let path = format!("/system/{system_id}/credentials");
        self.send(Method::DELETE, Base::Admin, &path, StatusCode::OK, |req| req)
            .await
            .map(|_| ())
    }

    /// `DELETE /token/{id}`, expecting 200.
    pub async fn revoke_access_token(&self, token_id: &str) -> Result<(), AuthError> {
        let path = format!("/token/{token_id}");
        self.send(Method::DELETE, Base::Admin, &path, StatusCode::OK, |req| req)
            .await
            .map(|_| ())
    }

    /// `POST /token` on the public URL with the client's Basic credentials.
    pub async fn get_token(
        &self,
        client_id: &str,
        client_secret: &Secret,
    ) -> Result<TokenResponse, AuthError> {
        self.call(Method::POST, Base::Public, "/token", StatusCode::OK, |req| {
            req.basic_auth(client_id, Some(client_secret.expose()))
        })
        .await
    }

    /// `POST /introspect` on the public URL with this service's credentials.
    pub async fn verify_public_token(&self, token: &str) -> Result<IntrospectResponse, AuthError> {
        let (Some(id), Some(secret)) = (&self.service_id, &self.service_secret) else {
            return Err(AuthError::config(
                "remote client id and secret are required to introspect tokens",
            ));
        };

        let body = IntrospectRequest { token };
        self.call(Method::POST, Base::Public, "/introspect", StatusCode::OK, |req| {
            req.basic_auth(id, Some(secret.expose())).json(&body)
        })
        .await
    }

    /// Send a request and decode a JSON response.
    async fn call<T, F>(
        &self,
        method: Method,
        base: Base,
        path: &str,
        expected: StatusCode,
        configure: F,
    ) -> Result<T, AuthError>
    where
        T: DeserializeOwned,
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let body = self.send(method.clone(), base, path, expected, configure).await?;
        serde_json::from_str(&body).map_err(|e| AuthError::RemoteDecode {
            method: method.to_string(),
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    /// Send a request and return the body of a response with the expected status.
    async fn send<F>(
        &self,
        method: Method,
        base: Base,
        path: &str,
        expected: StatusCode,
        configure: F,
    ) -> Result<String, AuthError>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let url = self.endpoint(base, path)?;
        debug!("{} {}", method, url);

        let request = configure(
            self.http
                .request(method.clone(), url)
                .header(reqwest::header::ACCEPT, "application/json"),
        );

        let transport = |e: reqwest::Error| AuthError::Transport {
            method: method.to_string(),
            path: path.to_string(),
            timed_out: e.is_timeout(),
            message: e.to_string(),
        };
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;

        if status != expected {
            return Err(AuthError::Remote {
                method: method.to_string(),
                path: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    fn endpoint(&self, base: Base, path: &str) -> Result<Url, AuthError> {
        let base = match base {
            Base::Admin => &self.admin_url,
            Base::Public => &self.public_url,
        };
        let joined = format!("{}{}", base.as_str().trim_end_matches('/'), path);
        Url::parse(&joined).map_err(|e| AuthError::config(format!("invalid endpoint {joined}: {e}")))
    }
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>, AuthError> {
    std::fs::read(path)
        .map_err(|e| AuthError::config(format!("unable to read {what} {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokenward_core::ErrorKind;

    fn config(url: &str) -> RemoteConfig {
        RemoteConfig {
            url: Some(url.to_string()),
            timeout_ms: Some(500),
            ..RemoteConfig::default()
        }
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = RemoteServiceClient::new(&config("http://ssas:3004/api/")).unwrap();
        let url = client.endpoint(Base::Admin, "/system/7/key").unwrap();
        assert_eq!(url.as_str(), "http://ssas:3004/api/system/7/key");
    }

    #[test]
    fn test_tls_requires_every_file() {
        let mut config = config("https://ssas:3004");
        config.use_tls = true;
        config.client_cert_file = Some("testdata/client_cert.pem".into());

        let err = RemoteServiceClient::new(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_tls_missing_file_names_path() {
        let mut config = config("https://ssas:3004");
        config.use_tls = true;
        config.client_cert_file = Some("testdata/missing_cert.pem".into());
        config.client_key_file = Some("testdata/client_key.pem".into());
        config.ca_file = Some("testdata/ca.pem".into());

        let err = RemoteServiceClient::new(&config).unwrap_err();
        assert!(err.to_string().contains("missing_cert.pem"));
    }

    #[test]
    fn test_tls_client_builds_from_pem_files() {
        let dir = env!("CARGO_MANIFEST_DIR");
        let mut config = config("https://ssas:3004");
        config.use_tls = true;
        config.client_cert_file = Some(format!("{dir}/testdata/client_cert.pem").into());
        config.client_key_file = Some(format!("{dir}/testdata/client_key.pem").into());
        config.ca_file = Some(format!("{dir}/testdata/ca.pem").into());

        assert!(RemoteServiceClient::new(&config).is_ok());
    }

    #[tokio::test]
    async fn test_introspect_requires_service_credentials() {
        let client = RemoteServiceClient::new(&config("http://127.0.0.1:9")).unwrap();
        let err = client.verify_public_token("token").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
