//! Client configuration.
//!
//! Configuration is built once at startup and passed by value into the token
//! manager and the executor; nothing here is global.

use std::time::Duration;

use url::Url;

use crate::error::ApiError;
use crate::retry::RetryPolicy;

/// Endpoint used when nothing overrides it.
pub const DEFAULT_ENDPOINT: &str = "https://api.public.com/";

/// Environment variable that overrides the endpoint.
pub const ENDPOINT_ENV: &str = "BROKERLINE_ENDPOINT";

/// Token issuing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSettings {
    /// Validity window requested from the issuing endpoint.
    pub validity_minutes: u32,

    /// Tokens are renewed once they are this close to their expiry.
    pub expiry_buffer: Duration,

    /// Wait suggested when the issuing endpoint rate limits without a
    /// `Retry-After` header.
    pub default_rate_limit_wait: Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            validity_minutes: 120,
            expiry_buffer: Duration::from_secs(60),
            default_rate_limit_wait: Duration::from_millis(5000),
        }
    }
}

/// Everything the request layer needs to know about its environment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API base URL; always ends with `/`.
    pub endpoint: Url,

    /// Retry behavior for resource calls.
    pub retry: RetryPolicy,

    /// Token issuing parameters.
    pub token: TokenSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            retry: RetryPolicy::default(),
            token: TokenSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Default configuration against the given endpoint.
    pub fn with_endpoint(endpoint: &str) -> Result<Self, ApiError> {
        Ok(Self {
            endpoint: parse_endpoint(endpoint)?,
            ..Self::default()
        })
    }

    /// Replace the retry policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Turn retries on or off for every call made with this configuration.
    pub fn retries_enabled(mut self, enabled: bool) -> Self {
        self.retry.enabled = enabled;
        self
    }

    /// Replace the token settings.
    pub fn token(mut self, token: TokenSettings) -> Self {
        self.token = token;
        self
    }

    /// Resolve a relative API path against the endpoint.
    pub fn url_for(&self, path: &str) -> Result<Url, ApiError> {
        self.endpoint
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::Config {
                message: format!("invalid request path '{}': {}", path, e),
            })
    }
}

fn default_endpoint() -> Url {
    Url::parse(DEFAULT_ENDPOINT).expect("default endpoint is a valid URL")
}

/// Validate an endpoint URL and normalize it to end with `/`.
///
/// Only `http` and `https` endpoints are accepted.
pub fn parse_endpoint(raw: &str) -> Result<Url, ApiError> {
    let trimmed = raw.trim();
    let normalized = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };

    let url = Url::parse(&normalized).map_err(|e| ApiError::Config {
        message: format!("invalid endpoint '{}': {}", trimmed, e),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ApiError::Config {
            message: format!(
                "invalid endpoint '{}': scheme must be http or https, got {}",
                trimmed, other
            ),
        }),
    }
}
