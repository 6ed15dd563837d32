//! Integration tests for the remote credential service protocol.
//!
//! A wiremock server stands in for the service and checks methods, paths,
//! bodies and credentials of every request.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use tokenward_client::{RemoteConfig, RemoteProvider, RemoteServiceClient};
use tokenward_core::{
    AccessTokenParams, AuthError, AuthProvider, Claims, ClientParams, ErrorKind,
    MemoryRepository, RegisterClientParams, Secret, SigningKeys, TokenAuthority,
    UpdateClientParams,
};
use wiremock::matchers::{basic_auth, body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PRIVATE_PEM: &[u8] = include_bytes!("../../tokenward-core/testdata/signing_private.pem");
const PUBLIC_PEM: &[u8] = include_bytes!("../../tokenward-core/testdata/signing_public.pem");
const SYSTEM_PUBLIC_PEM: &str = include_str!("../../tokenward-core/testdata/system1_public.pem");
const ACO_ID: &str = "0c527d2e-2e8a-4808-b11d-0fa06baf8254";

fn config(server: &MockServer) -> RemoteConfig {
    RemoteConfig {
        url: Some(server.uri()),
        public_url: Some(format!("{}/public", server.uri())),
        timeout_ms: Some(2_000),
        client_id: Some("service-id".to_string()),
        client_secret: Some(Secret::new("service-secret")),
        ..RemoteConfig::default()
    }
}

fn provider(server: &MockServer) -> RemoteProvider {
    RemoteProvider::from_config(&config(server)).unwrap()
}

/// A token signed like one the service would issue.
fn service_token(id: &str, ttl: ChronoDuration) -> Secret {
    let authority = TokenAuthority::new(
        SigningKeys::from_pem(PRIVATE_PEM, PUBLIC_PEM).unwrap(),
        Arc::new(MemoryRepository::new()),
    );
    let claims = Claims::new("client-1", ACO_ID, id, ttl)
        .unwrap()
        .with_scopes(vec!["bcda-api".to_string()])
        .with_client_id("client-1");
    authority.sign_jwt_token(&claims).unwrap()
}

#[tokio::test]
async fn test_register_client_creates_group_then_system() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/group"))
        .and(body_json(json!({"id": ACO_ID, "name": "ACO Corp", "scopes": ["bcda-api"]})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "ID": 12, "group_id": ACO_ID, "name": "ACO Corp"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/system"))
        .and(body_json(json!({
            "client_name": "ACO Corp",
            "group_id": ACO_ID,
            "scope": "bcda-api",
            "public_key": SYSTEM_PUBLIC_PEM,
            "tracking_id": "T12345"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "system_id": "7",
            "user_id": "3",
            "client_id": "client-1",
            "client_secret": "plaintext",
            "client_name": "ACO Corp",
            "token": "registration-token"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let system_id = provider(&server)
        .register_client(RegisterClientParams {
            aco_id: ACO_ID.to_string(),
            name: "ACO Corp".to_string(),
            public_key: Some(SYSTEM_PUBLIC_PEM.to_string()),
            tracking_id: Some("T12345".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(system_id, "7");
}

#[tokio::test]
async fn test_register_client_requires_name_and_key() {
    let server = MockServer::start().await;

    let err = provider(&server)
        .register_client(RegisterClientParams::new(ACO_ID))
        .await
        .unwrap_err();
    match err {
        AuthError::Validation { problems } => assert_eq!(problems.len(), 2),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_system_bad_request_keeps_details() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/system"))
        .respond_with(ResponseTemplate::new(400).set_body_string("missing public_key"))
        .mount(&server)
        .await;

    let client = RemoteServiceClient::new(&config(&server)).unwrap();
    let err = client
        .create_system(&tokenward_client::CreateSystemRequest {
            client_name: "ACO Corp".to_string(),
            group_id: ACO_ID.to_string(),
            scope: "bcda-api".to_string(),
            public_key: String::new(),
            tracking_id: String::new(),
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Remote);
    match err {
        AuthError::Remote {
            method,
            path,
            status,
            body,
        } => {
            assert_eq!(method, "POST");
            assert_eq!(path, "/system");
            assert_eq!(status, 400);
            assert_eq!(body, "missing public_key");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_reset_unknown_system_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/system/999/credentials"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let err = provider(&server)
        .generate_client_credentials(ClientParams::new("999"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_generate_credentials_resets_secret() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/system/7/credentials"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "client_id": "client-1",
            "client_secret": "new-secret"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let creds = provider(&server)
        .generate_client_credentials(ClientParams::new("7"))
        .await
        .unwrap();
    assert_eq!(creds.client_id, "client-1");
    assert_eq!(creds.client_secret.unwrap().expose(), "new-secret");
    assert!(creds.token.is_none());
}

#[tokio::test]
async fn test_revoke_and_delete_client_delete_credentials() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/system/7/credentials"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let provider = provider(&server);
    let summary = provider
        .revoke_client_credentials(ClientParams::new("7"))
        .await
        .unwrap();
    assert_eq!(summary.revoked, 1);
    provider.delete_client(ClientParams::new("7")).await.unwrap();
}

#[tokio::test]
async fn test_update_client_is_unsupported() {
    let server = MockServer::start().await;

    let err = provider(&server)
        .update_client(UpdateClientParams {
            client_id: "7".to_string(),
            name: Some("Renamed".to_string()),
            public_key: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
}

#[tokio::test]
async fn test_get_public_key() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/system/7/key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "client_id": "client-1",
            "public_key": SYSTEM_PUBLIC_PEM
        })))
        .mount(&server)
        .await;

    let client = RemoteServiceClient::new(&config(&server)).unwrap();
    let key = client.get_public_key("7").await.unwrap();
    assert_eq!(key.client_id, "client-1");
    assert_eq!(key.public_key, SYSTEM_PUBLIC_PEM);
}

#[tokio::test]
async fn test_group_update_and_delete() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/group/12"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ID": 12, "group_id": "A12345", "name": "ACO Corp Systems", "xdata": "{\"cms_ids\":[\"A0001\"]}"
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/group/12"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = RemoteServiceClient::new(&config(&server)).unwrap();
    let data = tokenward_core::GroupData {
        group_id: "A12345".to_string(),
        xdata: "{\"cms_ids\":[\"A0001\"]}".to_string(),
        ..Default::default()
    };
    let group = client.update_group(12, &data).await.unwrap();
    assert_eq!(group.id, 12);
    assert_eq!(group.xdata, data.xdata);

    client.delete_group(12).await.unwrap();
}

#[tokio::test]
async fn test_request_access_token_uses_basic_auth_on_public_url() {
    let server = MockServer::start().await;
    let token = service_token("token-1", ChronoDuration::hours(1));

    Mock::given(method("POST"))
        .and(path("/public/token"))
        .and(basic_auth("client-1", "client-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": token.expose(),
            "token_type": "bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let issued = provider(&server)
        .request_access_token(
            AccessTokenParams::new("client-1", 1).with_secret(Secret::new("client-secret")),
        )
        .await
        .unwrap();
    assert_eq!(issued.token, token);
    assert_eq!(issued.claims.id, "token-1");
    assert_eq!(issued.claims.cid.as_deref(), Some("client-1"));
}

#[tokio::test]
async fn test_request_access_token_requires_secret() {
    let server = MockServer::start().await;

    let err = provider(&server)
        .request_access_token(AccessTokenParams::new("client-1", 1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_revoke_access_token_deletes_by_token_id() {
    let server = MockServer::start().await;
    let token = service_token("token-42", ChronoDuration::hours(1));

    Mock::given(method("DELETE"))
        .and(path("/token/token-42"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    provider(&server)
        .revoke_access_token(token.expose())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_validate_consults_introspection() {
    let server = MockServer::start().await;
    let live = service_token("live", ChronoDuration::hours(1));
    let revoked = service_token("revoked", ChronoDuration::hours(1));

    Mock::given(method("POST"))
        .and(path("/public/introspect"))
        .and(basic_auth("service-id", "service-secret"))
        .and(body_json(json!({"token": live.expose()})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"active": true})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/public/introspect"))
        .and(body_json(json!({"token": revoked.expose()})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"active": false})))
        .mount(&server)
        .await;

    let provider = provider(&server);
    let claims = provider.validate_access_token(live.expose()).await.unwrap();
    assert_eq!(claims.id, "live");

    let err = provider
        .validate_access_token(revoked.expose())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Revoked);
}

#[tokio::test]
async fn test_validate_honors_service_expiry() {
    let server = MockServer::start().await;
    let token = service_token("cut-short", ChronoDuration::hours(1));
    let cutoff = Utc::now().timestamp() - 60;

    Mock::given(method("POST"))
        .and(path("/public/introspect"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"active": true, "exp": cutoff})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = provider(&server)
        .validate_access_token(token.expose())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Expired { expired_at } if expired_at == cutoff));
}

#[tokio::test]
async fn test_validate_rejects_expired_without_calling_service() {
    let server = MockServer::start().await;
    let expired = service_token("old", ChronoDuration::hours(-1));

    let err = provider(&server)
        .validate_access_token(expired.expose())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Expired);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_timeout_is_reported_as_transport_error() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/group/1"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.timeout_ms = Some(50);
    let client = RemoteServiceClient::new(&config).unwrap();

    let err = client.delete_group(1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(matches!(err, AuthError::Transport { timed_out: true, .. }));
}
