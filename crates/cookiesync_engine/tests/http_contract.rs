//! Contract tests of the HTTP remote against a mock server.

use chrono::Utc;
use cookiesync_engine::{Endpoint, HttpRemote, RemoteApi, SyncError};
use cookiesync_protocol::{ApiCookie, CookieRecord, UserSettings};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "test-token";

async fn setup() -> (MockServer, HttpRemote, Endpoint) {
    let server = MockServer::start().await;
    let remote = HttpRemote::new(Duration::from_secs(5)).unwrap();
    let endpoint = Endpoint::new(&format!("{}/api/v1", server.uri()), TOKEN).unwrap();
    (server, remote, endpoint)
}

fn payload() -> Vec<ApiCookie> {
    let record = CookieRecord::new("sid", ".example.com", "/", "v2").with_sharable(true);
    vec![ApiCookie::from_record(&record, Utc::now())]
}

#[tokio::test]
async fn push_posts_array_with_api_key() {
    let (server, remote, endpoint) = setup().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/sync"))
        .and(header("x-api-key", TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200,
            "message": "ok"
        })))
        .expect(1)
        .mount(&server)
        .await;

    remote.push(&endpoint, &payload()).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let cookie = &body[0];
    assert_eq!(cookie["name"], "sid");
    assert_eq!(cookie["domain"], ".example.com");
    assert_eq!(cookie["value"], "v2");
    assert_eq!(cookie["is_sharable"], true);
    assert!(cookie["expires"].is_null());
    assert!(cookie["last_updated_from_extension_at"].is_string());
}

#[tokio::test]
async fn push_rejects_unexpected_code() {
    let (server, remote, endpoint) = setup().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/sync"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 500,
            "message": "database unavailable"
        })))
        .mount(&server)
        .await;

    let err = remote.push(&endpoint, &payload()).await.unwrap_err();
    assert!(matches!(err, SyncError::Protocol(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn push_rejects_malformed_body() {
    let (server, remote, endpoint) = setup().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/sync"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let err = remote.push(&endpoint, &payload()).await.unwrap_err();
    assert!(matches!(err, SyncError::Protocol(_)));
}

#[tokio::test]
async fn server_errors_keep_status() {
    let (server, remote, endpoint) = setup().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/sync"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = remote.push(&endpoint, &payload()).await.unwrap_err();
    match err {
        SyncError::Remote { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message, "maintenance");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unauthorized_is_reported_as_auth_failure() {
    let (server, remote, endpoint) = setup().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/auth/test"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = remote.test_auth(&endpoint).await.unwrap_err();
    assert!(matches!(err, SyncError::Remote { status: 401, .. }));
    assert!(err.to_string().contains("authentication failed"));
}

#[tokio::test]
async fn auth_test_requires_confirmation_message() {
    let (server, remote, endpoint) = setup().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/auth/test"))
        .and(header("x-api-key", TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200,
            "message": "Token is valid"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    remote.test_auth(&endpoint).await.unwrap();

    Mock::given(method("GET"))
        .and(path("/api/v1/auth/test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200,
            "message": "hello"
        })))
        .mount(&server)
        .await;
    assert!(remote.test_auth(&endpoint).await.is_err());
}

#[tokio::test]
async fn user_settings_get_and_put() {
    let (server, remote, endpoint) = setup().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/user/settings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200,
            "message": "ok",
            "data": { "sharing_enabled": true }
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/user/settings"))
        .and(body_json(json!({ "sharing_enabled": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200,
            "message": "updated"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let settings = remote.user_settings(&endpoint).await.unwrap();
    assert!(settings.sharing_enabled);
    remote
        .update_user_settings(
            &endpoint,
            UserSettings {
                sharing_enabled: false,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn unreachable_server_is_retryable() {
    let remote = HttpRemote::new(Duration::from_secs(1)).unwrap();
    let endpoint = Endpoint::new("http://127.0.0.1:9/api", TOKEN).unwrap();
    let err = remote.push(&endpoint, &payload()).await.unwrap_err();
    assert!(err.is_retryable());
}
