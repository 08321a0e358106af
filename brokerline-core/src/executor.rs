//! Resilient authenticated request executor.
//!
//! [`RequestExecutor::execute`] drives one logical API call to completion.
//! Each call walks a small state machine:
//!
//! ```text
//! Authorizing ──token──▶ Requesting ──2xx──▶ done
//!      ▲                    │
//!      │ 401 (once)         ├─ 401 again ─────▶ authentication error
//!      ├────────────────────┤
//!      │                    ├─ 429 / 5xx / transport ─▶ BackoffWait ─┐
//!      │                    │                                         │
//!      └────────────────────┼─────────────────────────────────────────┘
//!                           └─ other 4xx ─────▶ error, no retry
//! ```
//!
//! Backoff retries are bounded by the retry policy. The forced token refresh
//! triggered by a 401 is tracked by a [`RefreshBudget`] that can be spent once
//! per call and does not count against the retry budget.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::{
    config::ClientConfig,
    error::{ApiError, server_message},
    retry::{Sleeper, TokioSleeper, parse_retry_after},
    token::{CachedToken, TokenProvider},
};

/// Message of the error raised when a refreshed token is still rejected.
pub const REAUTHENTICATE: &str = "Authentication failed. Please run \"brokerline auth login\" again.";

/// Message of the error raised when rate limiting outlasts the retry budget.
pub const TOO_MANY_REQUESTS: &str = "Too many requests. Please try again later.";

/// Per-call switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Make a single attempt regardless of the retry policy.
    pub skip_retry: bool,
}

/// One logical API operation.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the configured endpoint.
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub options: RequestOptions,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            options: RequestOptions::default(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body.
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Opt this call out of retries.
    pub fn skip_retry(mut self) -> Self {
        self.options.skip_retry = true;
        self
    }
}

/// Whether the once-per-call forced token refresh is still available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshBudget {
    Available,
    Spent,
}

/// Where a call currently is.
#[derive(Debug)]
enum State {
    Authorizing { force_refresh: bool },
    Requesting(CachedToken),
    BackoffWait { delay: Duration, cause: ApiError },
}

/// Transient bookkeeping for one logical call.
#[derive(Debug)]
struct RetryContext {
    /// Backoff retries consumed so far; also the backoff exponent.
    attempt: u32,
    max_retries: u32,
    refresh: RefreshBudget,
    /// HTTP requests sent to the resource endpoint.
    requests: u32,
}

impl RetryContext {
    fn new(max_retries: u32) -> Self {
        Self {
            attempt: 0,
            max_retries,
            refresh: RefreshBudget::Available,
            requests: 0,
        }
    }

    fn retries_remain(&self) -> bool {
        self.attempt < self.max_retries
    }
}

/// Classified response of a single request.
enum Reply<T> {
    Success(T),
    Unauthorized,
    RateLimited { retry_after: Option<Duration> },
    Failed(ApiError),
}

/// Executes authenticated API calls with token refresh and bounded retries.
pub struct RequestExecutor {
    http_client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    config: ClientConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl RequestExecutor {
    /// Create an executor using `tokens` for authorization.
    pub fn new(config: &ClientConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        Self::with_http_client(config, tokens, reqwest::Client::new())
    }

    /// Create an executor sharing an existing HTTP client.
    pub fn with_http_client(
        config: &ClientConfig,
        tokens: Arc<dyn TokenProvider>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            http_client,
            tokens,
            config: config.clone(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the sleeper used for backoff waits.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// `GET` a path and decode the payload.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute(&ApiRequest::get(path)).await
    }

    /// Run `request` to completion and decode its payload.
    ///
    /// An empty success body decodes as JSON `null`.
    pub async fn execute<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        let url = self.config.url_for(&request.path)?;
        let policy = &self.config.retry;
        let mut ctx = RetryContext::new(policy.effective_retries(request.options.skip_retry));
        let mut state = State::Authorizing {
            force_refresh: false,
        };

        loop {
            state = match state {
                State::Authorizing { force_refresh } => {
                    match self.tokens.get_valid_token(force_refresh).await {
                        Ok(token) => State::Requesting(token),
                        Err(e) => {
                            let hint = e.retry_after();
                            self.schedule_retry(&ctx, e, hint)?
                        }
                    }
                }

                State::Requesting(token) => {
                    ctx.requests += 1;
                    tracing::debug!(
                        method = %request.method,
                        path = %request.path,
                        request = ctx.requests,
                        attempt = ctx.attempt,
                        "Sending API request"
                    );

                    match self.send::<T>(request, &url, &token).await {
                        Reply::Success(payload) => return Ok(payload),
                        Reply::Unauthorized => self.on_unauthorized(&mut ctx).await?,
                        Reply::RateLimited { retry_after } => {
                            let delay =
                                retry_after.unwrap_or_else(|| policy.backoff_delay(ctx.attempt));
                            let error = ApiError::rate_limited(TOO_MANY_REQUESTS, delay);
                            self.schedule_retry(&ctx, error, Some(delay))?
                        }
                        Reply::Failed(error) => self.schedule_retry(&ctx, error, None)?,
                    }
                }

                State::BackoffWait { delay, cause } => {
                    tracing::warn!(
                        method = %request.method,
                        path = %request.path,
                        retry = ctx.attempt + 1,
                        max_retries = ctx.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Retrying after error: {}",
                        cause
                    );
                    self.sleeper.sleep(delay).await;
                    ctx.attempt += 1;
                    State::Authorizing {
                        force_refresh: false,
                    }
                }
            };
        }
    }

    /// Decide between backing off and failing for a classified error.
    fn schedule_retry(
        &self,
        ctx: &RetryContext,
        error: ApiError,
        delay: Option<Duration>,
    ) -> Result<State, ApiError> {
        if !error.is_retryable() || !ctx.retries_remain() {
            return Err(error);
        }

        let delay = delay.unwrap_or_else(|| self.config.retry.backoff_delay(ctx.attempt));
        Ok(State::BackoffWait {
            delay,
            cause: error,
        })
    }

    /// A 401 spends the refresh budget once; a second one is fatal.
    async fn on_unauthorized(&self, ctx: &mut RetryContext) -> Result<State, ApiError> {
        self.tokens.invalidate().await?;

        match ctx.refresh {
            RefreshBudget::Available => {
                tracing::info!("Access token rejected, refreshing once");
                ctx.refresh = RefreshBudget::Spent;
                Ok(State::Authorizing {
                    force_refresh: true,
                })
            }
            RefreshBudget::Spent => Err(ApiError::authentication(REAUTHENTICATE)),
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        url: &Url,
        token: &CachedToken,
    ) -> Reply<T> {
        let bearer = match HeaderValue::from_str(&token.bearer()) {
            Ok(mut value) => {
                value.set_sensitive(true);
                value
            }
            Err(_) => {
                return Reply::Failed(ApiError::authentication(
                    "Access token contains invalid header characters",
                ));
            }
        };

        let mut builder = self
            .http_client
            .request(request.method.clone(), url.clone())
            .header(AUTHORIZATION, bearer)
            .header(CONTENT_TYPE, "application/json");

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return Reply::Failed(ApiError::Transport(e)),
        };

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return Reply::Failed(ApiError::Transport(e)),
        };

        tracing::debug!(status = status.as_u16(), bytes = body.len(), "Received API response");

        if status.is_success() {
            return match decode_body(&body) {
                Ok(payload) => Reply::Success(payload),
                Err(e) => Reply::Failed(ApiError::MalformedResponse(e)),
            };
        }

        classify_failure(status, retry_after, &body)
    }
}

fn classify_failure<T>(status: StatusCode, retry_after: Option<Duration>, body: &[u8]) -> Reply<T> {
    match status {
        StatusCode::UNAUTHORIZED => Reply::Unauthorized,
        StatusCode::TOO_MANY_REQUESTS => Reply::RateLimited { retry_after },
        StatusCode::NOT_FOUND => Reply::Failed(ApiError::not_found(server_message(404, body))),
        s if s.is_server_error() => Reply::Failed(ApiError::api(
            format!("Server error: {}", server_message(s.as_u16(), body)),
            Some(s.as_u16()),
            true,
        )),
        s => Reply::Failed(ApiError::api(
            server_message(s.as_u16(), body),
            Some(s.as_u16()),
            false,
        )),
    }
}

fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        serde_json::from_value(serde_json::Value::Null)
    } else {
        serde_json::from_slice(body)
    }
}
