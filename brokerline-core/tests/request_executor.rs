//! Integration tests for the resilient request executor.
//!
//! A wiremock server plays both the token-issuing endpoint and the resource
//! endpoints. Backoff waits go through a recording sleeper so the tests can
//! assert the requested delays without waiting for them.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use brokerline_core::{
    ApiError, ApiRequest, CachedToken, ClientConfig, DefaultTokenManager, MemoryStore,
    RequestExecutor, Secret, SecretStore, Sleeper, TradingApi,
    executor::{REAUTHENTICATE, TOO_MANY_REQUESTS},
    store::{ACCESS_TOKEN_ENTRY, API_KEY_ENTRY},
    token_manager::{NOT_AUTHENTICATED, TOKEN_PATH},
};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header, method, path},
};

const ACCOUNTS_PATH: &str = "/userapigateway/trading/account";

/// Records requested delays instead of sleeping.
#[derive(Default)]
struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
    }
}

struct Harness {
    manager: Arc<DefaultTokenManager<MemoryStore>>,
    executor: RequestExecutor,
    sleeper: Arc<RecordingSleeper>,
}

impl Harness {
    /// Executor against `endpoint` with a stored API key and, optionally, a
    /// cached token that is valid for another hour.
    async fn new(config: ClientConfig, cached_token: Option<&str>) -> Self {
        let manager = Arc::new(DefaultTokenManager::new(MemoryStore::new(), &config));
        manager
            .store()
            .set(API_KEY_ENTRY, &Secret::new("long-lived-secret-0123456789"))
            .await
            .unwrap();

        if let Some(value) = cached_token {
            let token = CachedToken::new(value, Utc::now() + chrono::Duration::hours(1));
            manager
                .store()
                .set(
                    ACCESS_TOKEN_ENTRY,
                    &Secret::new(serde_json::to_string(&token).unwrap()),
                )
                .await
                .unwrap();
        }

        let sleeper = Arc::new(RecordingSleeper::default());
        let executor = RequestExecutor::new(&config, manager.clone()).with_sleeper(sleeper.clone());

        Self {
            manager,
            executor,
            sleeper,
        }
    }

    async fn against(server: &MockServer, cached_token: Option<&str>) -> Self {
        Self::new(ClientConfig::with_endpoint(&server.uri()).unwrap(), cached_token).await
    }
}

async fn mount_token_endpoint(server: &MockServer, access_token: &str, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path(format!("/{}", TOKEN_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessToken": access_token
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn assert_backoff(delay: Duration, attempt: u32) {
    let floor = Duration::from_millis(2000 * 2u64.pow(attempt));
    assert!(delay >= floor, "retry {attempt}: {delay:?} below {floor:?}");
    assert!(delay <= floor + Duration::from_millis(1000));
    assert!(delay <= Duration::from_millis(15_000));
}

#[tokio::test]
async fn test_server_errors_then_success_on_fourth_attempt() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "unused", 0).await;

    Mock::given(method("GET"))
        .and(path(ACCOUNTS_PATH))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .with_priority(1)
        .expect(3)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(ACCOUNTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accounts": [] })))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::against(&server, Some("cached")).await;
    let payload: Value = harness
        .executor
        .execute(&ApiRequest::get("userapigateway/trading/account"))
        .await
        .unwrap();

    assert_eq!(payload, json!({ "accounts": [] }));

    let delays = harness.sleeper.delays();
    assert_eq!(delays.len(), 3);
    for (attempt, delay) in delays.into_iter().enumerate() {
        assert_backoff(delay, attempt as u32);
    }
}

#[tokio::test]
async fn test_server_errors_exhaust_retries() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ACCOUNTS_PATH))
        .respond_with(ResponseTemplate::new(502).set_body_json(json!({ "message": "upstream down" })))
        .expect(4)
        .mount(&server)
        .await;

    let harness = Harness::against(&server, Some("cached")).await;
    let err = harness
        .executor
        .get::<Value>("userapigateway/trading/account")
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(err.status(), Some(502));
    assert_eq!(err.to_string(), "Server error: upstream down");
    assert_eq!(harness.sleeper.delays().len(), 3);
}

#[tokio::test]
async fn test_rate_limit_honors_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ACCOUNTS_PATH))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "2"))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(ACCOUNTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accounts": [] })))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::against(&server, Some("cached")).await;
    let payload: Value = harness
        .executor
        .get("userapigateway/trading/account")
        .await
        .unwrap();

    assert_eq!(payload["accounts"], json!([]));
    assert_eq!(harness.sleeper.delays(), vec![Duration::from_millis(2000)]);
}

#[tokio::test]
async fn test_rate_limit_without_header_uses_backoff_then_surfaces() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ACCOUNTS_PATH))
        .respond_with(ResponseTemplate::new(429))
        .expect(4)
        .mount(&server)
        .await;

    let harness = Harness::against(&server, Some("cached")).await;
    let err = harness
        .executor
        .get::<Value>("userapigateway/trading/account")
        .await
        .unwrap_err();

    match &err {
        ApiError::RateLimited { message, retry_after } => {
            assert_eq!(message, TOO_MANY_REQUESTS);
            // 2000ms * 2^3 is past the single-wait ceiling.
            assert_eq!(*retry_after, Duration::from_millis(15_000));
        }
        other => panic!("expected rate limit error, got {other:?}"),
    }
    assert!(err.is_retryable());

    let delays = harness.sleeper.delays();
    assert_eq!(delays.len(), 3);
    for (attempt, delay) in delays.into_iter().enumerate() {
        assert_backoff(delay, attempt as u32);
    }
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/userapigateway/trading/X/portfolio/v2"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "message": "Account 'X' not found" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::against(&server, Some("cached")).await;
    let api = TradingApi::new(harness.executor);
    let err = api.portfolio("X").await.unwrap_err();

    match err {
        ApiError::NotFound { message } => assert_eq!(message, "Account 'X' not found"),
        other => panic!("expected not found, got {other:?}"),
    }
    assert!(harness.sleeper.delays().is_empty());
}

#[tokio::test]
async fn test_client_error_uses_server_message_without_retry() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/userapigateway/trading/A1/order"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({ "error": "invalid quantity" })))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::against(&server, Some("cached")).await;
    let err = harness
        .executor
        .execute::<Value>(
            &ApiRequest::post("userapigateway/trading/A1/order").with_body(json!({ "quantity": "-1" })),
        )
        .await
        .unwrap_err();

    assert!(!err.is_retryable());
    assert_eq!(err.status(), Some(422));
    assert_eq!(err.to_string(), "invalid quantity");
    assert!(harness.sleeper.delays().is_empty());
}

#[tokio::test]
async fn test_unauthorized_refreshes_token_once_then_succeeds() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "fresh", 1).await;

    Mock::given(method("GET"))
        .and(path(ACCOUNTS_PATH))
        .and(header("Authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(ACCOUNTS_PATH))
        .and(header("Authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accounts": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::against(&server, Some("stale")).await;
    let payload: Value = harness
        .executor
        .get("userapigateway/trading/account")
        .await
        .unwrap();

    assert_eq!(payload, json!({ "accounts": [] }));
    // The refresh is not a backoff retry.
    assert!(harness.sleeper.delays().is_empty());

    let cached = harness.manager.cached_token().await.unwrap().unwrap();
    assert_eq!(cached.access_token.expose(), "fresh");
}

#[tokio::test]
async fn test_second_unauthorized_is_fatal() {
    let server = MockServer::start().await;
    // Exactly one forced refresh, no matter how often the server says 401.
    mount_token_endpoint(&server, "also-rejected", 1).await;

    Mock::given(method("GET"))
        .and(path(ACCOUNTS_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let harness = Harness::against(&server, Some("stale")).await;
    let err = harness
        .executor
        .get::<Value>("userapigateway/trading/account")
        .await
        .unwrap_err();

    match &err {
        ApiError::Authentication { message } => assert_eq!(message, REAUTHENTICATE),
        other => panic!("expected authentication error, got {other:?}"),
    }
    assert!(!err.is_retryable());
    assert!(harness.manager.cached_token().await.unwrap().is_none());
    assert!(harness.manager.has_secret().await.unwrap());
}

#[tokio::test]
async fn test_refresh_allowed_when_retries_disabled() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "fresh", 1).await;

    Mock::given(method("GET"))
        .and(path(ACCOUNTS_PATH))
        .and(header("Authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(ACCOUNTS_PATH))
        .and(header("Authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accounts": [] })))
        .mount(&server)
        .await;

    let config = ClientConfig::with_endpoint(&server.uri())
        .unwrap()
        .retries_enabled(false);
    let harness = Harness::new(config, Some("stale")).await;

    let payload: Value = harness
        .executor
        .get("userapigateway/trading/account")
        .await
        .unwrap();
    assert_eq!(payload, json!({ "accounts": [] }));
}

#[tokio::test]
async fn test_retries_disabled_globally() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ACCOUNTS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let config = ClientConfig::with_endpoint(&server.uri())
        .unwrap()
        .retries_enabled(false);
    let harness = Harness::new(config, Some("cached")).await;

    let err = harness
        .executor
        .get::<Value>("userapigateway/trading/account")
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Api { status: Some(503), retryable: true, .. }));
    assert!(harness.sleeper.delays().is_empty());
}

#[tokio::test]
async fn test_retries_disabled_per_call() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ACCOUNTS_PATH))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "9"))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::against(&server, Some("cached")).await;
    let err = harness
        .executor
        .execute::<Value>(&ApiRequest::get("userapigateway/trading/account").skip_retry())
        .await
        .unwrap_err();

    assert_eq!(err.retry_after(), Some(Duration::from_secs(9)));
    assert!(harness.sleeper.delays().is_empty());
}

#[tokio::test]
async fn test_transport_failure_retried_then_raised() {
    // Reserve a port and release it so nothing is listening there.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = ClientConfig::with_endpoint(&format!("http://127.0.0.1:{port}/")).unwrap();
    let harness = Harness::new(config.clone(), Some("cached")).await;

    let err = harness
        .executor
        .get::<Value>("userapigateway/trading/account")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)));
    assert_eq!(harness.sleeper.delays().len(), 3);

    let harness = Harness::new(config.retries_enabled(false), Some("cached")).await;
    let err = harness
        .executor
        .get::<Value>("userapigateway/trading/account")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)));
    assert!(harness.sleeper.delays().is_empty());
}

#[tokio::test]
async fn test_malformed_success_body_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ACCOUNTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(ACCOUNTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accounts": [] })))
        .with_priority(2)
        .mount(&server)
        .await;

    let harness = Harness::against(&server, Some("cached")).await;
    let api = TradingApi::new(harness.executor);
    let accounts = api.accounts().await.unwrap();

    assert!(accounts.accounts.is_empty());
    assert_eq!(harness.sleeper.delays().len(), 1);
}

#[tokio::test]
async fn test_missing_secret_fails_before_any_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = ClientConfig::with_endpoint(&server.uri()).unwrap();
    let manager = Arc::new(DefaultTokenManager::new(MemoryStore::new(), &config));
    let executor = RequestExecutor::new(&config, manager);

    let err = executor
        .get::<Value>("userapigateway/trading/account")
        .await
        .unwrap_err();
    match err {
        ApiError::Authentication { message } => assert_eq!(message, NOT_AUTHENTICATED),
        other => panic!("expected authentication error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_body_and_empty_response() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "issued", 1).await;

    Mock::given(method("POST"))
        .and(path("/userapigateway/trading/A1/preflight/single-leg"))
        .and(header("Authorization", "Bearer issued"))
        .and(header("Content-Type", "application/json"))
        .and(body_json(json!({ "orderSide": "BUY", "quantity": "1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "estimatedCost": "10.00" })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/userapigateway/trading/A1/order/O%201"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    // No cached token: the first call exchanges, the second reuses the cache.
    let harness = Harness::against(&server, None).await;

    let preflight: Value = harness
        .executor
        .execute(
            &ApiRequest::post("userapigateway/trading/A1/preflight/single-leg")
                .with_body(json!({ "orderSide": "BUY", "quantity": "1" })),
        )
        .await
        .unwrap();
    assert_eq!(preflight["estimatedCost"], "10.00");

    let api = TradingApi::new(harness.executor);
    let cancelled = api.cancel_order("A1", "O 1").await.unwrap();
    assert_eq!(cancelled, Value::Null);
}
