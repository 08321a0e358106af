//! Integration tests for the token lifecycle.
//!
//! These tests verify that the DefaultTokenManager correctly:
//! - Serves cached tokens without touching the network
//! - Renews tokens that fall inside the expiry buffer
//! - Maps issuing-endpoint failures onto the error taxonomy
//! - Persists tokens and secrets only when the exchange succeeds

use std::time::Duration;

use brokerline_core::{
    ApiError, CachedToken, ClientConfig, DefaultTokenManager, MemoryStore, Secret, SecretStore,
    TokenProvider,
    store::API_KEY_ENTRY,
    token_manager::TOKEN_PATH,
};
use chrono::Utc;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, method, path},
};

const API_KEY: &str = "long-lived-secret-0123456789";

/// Helper to set up a token manager against a mock issuing endpoint.
async fn setup_manager(server: &MockServer) -> DefaultTokenManager<MemoryStore> {
    let config = ClientConfig::with_endpoint(&server.uri()).unwrap();
    let manager = DefaultTokenManager::new(MemoryStore::new(), &config);
    manager
        .store()
        .set(API_KEY_ENTRY, &Secret::new(API_KEY))
        .await
        .unwrap();
    manager
}

async fn seed_token(manager: &DefaultTokenManager<MemoryStore>, value: &str, expires_in: chrono::Duration) {
    let record = serde_json::to_string(&CachedToken::new(value, Utc::now() + expires_in)).unwrap();
    manager
        .store()
        .set("access-token", &Secret::new(record))
        .await
        .unwrap();
}

fn token_endpoint() -> String {
    format!("/{}", TOKEN_PATH)
}

#[tokio::test]
async fn test_exchange_and_persist_when_cache_empty() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(token_endpoint()))
        .and(body_json(serde_json::json!({
            "validityInMinutes": 120,
            "secret": API_KEY
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "abc"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let manager = setup_manager(&server).await;
    let before = Utc::now();

    let token = manager.get_valid_token(false).await.unwrap();

    assert_eq!(token.access_token.expose(), "abc");
    let minutes = (token.expires_at - before).num_minutes();
    assert!((119..=120).contains(&minutes), "validity was {minutes} minutes");

    let stored = manager.cached_token().await.unwrap().unwrap();
    assert_eq!(stored, token);
}

#[tokio::test]
async fn test_valid_cached_token_skips_network() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(token_endpoint()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "should-not-be-used"
        })))
        .expect(0)
        .mount(&server)
        .await;

    let manager = setup_manager(&server).await;
    seed_token(&manager, "cached", chrono::Duration::minutes(90)).await;

    for _ in 0..3 {
        let token = manager.get_valid_token(false).await.unwrap();
        assert_eq!(token.access_token.expose(), "cached");
    }
}

#[tokio::test]
async fn test_token_inside_buffer_triggers_one_exchange() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(token_endpoint()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "renewed"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let manager = setup_manager(&server).await;
    // 30 seconds left is inside the 60 second buffer.
    seed_token(&manager, "almost-expired", chrono::Duration::seconds(30)).await;

    let token = manager.get_valid_token(false).await.unwrap();
    assert_eq!(token.access_token.expose(), "renewed");

    // The renewed token is cached, so a second call stays offline.
    let token = manager.get_valid_token(false).await.unwrap();
    assert_eq!(token.access_token.expose(), "renewed");
}

#[tokio::test]
async fn test_force_refresh_ignores_valid_cache() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(token_endpoint()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "forced"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let manager = setup_manager(&server).await;
    seed_token(&manager, "cached", chrono::Duration::hours(1)).await;

    let token = manager.get_valid_token(true).await.unwrap();
    assert_eq!(token.access_token.expose(), "forced");
}

#[tokio::test]
async fn test_missing_secret_requires_login() {
    let server = MockServer::start().await;
    let config = ClientConfig::with_endpoint(&server.uri()).unwrap();
    let manager = DefaultTokenManager::new(MemoryStore::new(), &config);

    let err = manager.get_valid_token(false).await.unwrap_err();
    assert!(matches!(err, ApiError::Authentication { .. }));
    assert!(err.to_string().contains("auth login"));
}

#[tokio::test]
async fn test_rejected_secret_is_authentication_error() {
    for status in [401, 403] {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(token_endpoint()))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let manager = setup_manager(&server).await;
        let err = manager.get_valid_token(false).await.unwrap_err();

        match err {
            ApiError::Authentication { message } => assert_eq!(message, "Invalid API key"),
            other => panic!("expected authentication error for {status}, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_rate_limited_exchange_uses_header_or_default() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(token_endpoint()))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(token_endpoint()))
        .respond_with(ResponseTemplate::new(429))
        .with_priority(2)
        .mount(&server)
        .await;

    let manager = setup_manager(&server).await;

    let err = manager.get_valid_token(false).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));

    let err = manager.get_valid_token(false).await.unwrap_err();
    assert_eq!(err.retry_after(), Some(Duration::from_millis(5000)));
}

#[tokio::test]
async fn test_server_error_during_exchange_is_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(token_endpoint()))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(serde_json::json!({ "message": "maintenance" })),
        )
        .mount(&server)
        .await;

    let manager = setup_manager(&server).await;
    let err = manager.get_valid_token(false).await.unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(err.status(), Some(503));
    assert_eq!(err.to_string(), "Server error while fetching token: maintenance");
}

#[tokio::test]
async fn test_other_exchange_failure_is_final() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(token_endpoint()))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(serde_json::json!({ "error": "bad secret format" })),
        )
        .mount(&server)
        .await;

    let manager = setup_manager(&server).await;
    let err = manager.get_valid_token(false).await.unwrap_err();

    assert!(!err.is_retryable());
    assert_eq!(err.status(), Some(400));
    assert_eq!(err.to_string(), "Failed to get access token: bad secret format");
}

#[tokio::test]
async fn test_login_stores_secret_only_after_acceptance() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(token_endpoint()))
        .and(body_json(serde_json::json!({
            "validityInMinutes": 120,
            "secret": "rejected-secret-0000"
        })))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(token_endpoint()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "welcome"
        })))
        .with_priority(2)
        .mount(&server)
        .await;

    let config = ClientConfig::with_endpoint(&server.uri()).unwrap();
    let manager = DefaultTokenManager::new(MemoryStore::new(), &config);

    let err = manager
        .login(&Secret::new("rejected-secret-0000"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Authentication { .. }));
    assert!(!manager.has_secret().await.unwrap());
    assert!(manager.cached_token().await.unwrap().is_none());

    let token = manager.login(&Secret::new(API_KEY)).await.unwrap();
    assert_eq!(token.access_token.expose(), "welcome");
    assert!(manager.has_secret().await.unwrap());
    assert_eq!(manager.cached_token().await.unwrap(), Some(token));

    assert!(manager.logout().await.unwrap());
    assert!(!manager.has_secret().await.unwrap());
    assert!(manager.cached_token().await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalidate_then_refetch() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(token_endpoint()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "second"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let manager = setup_manager(&server).await;
    seed_token(&manager, "first", chrono::Duration::hours(1)).await;

    manager.invalidate().await.unwrap();
    assert!(manager.cached_token().await.unwrap().is_none());

    let token = manager.get_valid_token(false).await.unwrap();
    assert_eq!(token.access_token.expose(), "second");
}
