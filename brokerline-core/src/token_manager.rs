//! Default implementation of the [`TokenProvider`] trait.
//!
//! [`DefaultTokenManager`] exchanges the long-lived API secret for a
//! short-lived access token, caches the token in the [`SecretStore`], and
//! renews it once it comes within the configured expiry buffer.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), brokerline_core::ApiError> {
//! use brokerline_core::{ClientConfig, MemoryStore, TokenProvider, DefaultTokenManager};
//!
//! let manager = DefaultTokenManager::new(MemoryStore::new(), &ClientConfig::default());
//! let token = manager.get_valid_token(false).await?;
//! println!("expires at {}", token.expires_at);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{
    config::{ClientConfig, TokenSettings},
    error::{ApiError, server_message},
    retry::parse_retry_after,
    store::{ACCESS_TOKEN_ENTRY, API_KEY_ENTRY, Secret, SecretStore},
    token::{CachedToken, TokenProvider},
};

/// Path of the token-issuing endpoint, relative to the API endpoint.
pub const TOKEN_PATH: &str = "userapiauthservice/personal/access-tokens";

/// Message returned when no API secret has been stored.
pub const NOT_AUTHENTICATED: &str = "No API key configured. Run \"brokerline auth login\" first.";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    validity_in_minutes: u32,
    secret: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    access_token: String,
}

/// Token manager backed by a [`SecretStore`].
///
/// # Type Parameters
///
/// * `S` - The secret store implementation to use
pub struct DefaultTokenManager<S: SecretStore> {
    store: S,
    http_client: reqwest::Client,
    config: ClientConfig,
}

impl<S: SecretStore> DefaultTokenManager<S> {
    /// Create a token manager issuing tokens from `config.endpoint`.
    pub fn new(store: S, config: &ClientConfig) -> Self {
        Self::with_http_client(store, config, reqwest::Client::new())
    }

    /// Create a token manager sharing an existing HTTP client.
    pub fn with_http_client(store: S, config: &ClientConfig, http_client: reqwest::Client) -> Self {
        Self {
            store,
            http_client,
            config: config.clone(),
        }
    }

    fn settings(&self) -> &TokenSettings {
        &self.config.token
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Read the cached token record.
    ///
    /// A record that no longer decodes is treated as absent.
    pub async fn cached_token(&self) -> Result<Option<CachedToken>, ApiError> {
        let Some(record) = self.store.get(ACCESS_TOKEN_ENTRY).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<CachedToken>(record.expose()) {
            Ok(token) => Ok(Some(token)),
            Err(e) => {
                tracing::warn!("Ignoring undecodable cached token record: {}", e);
                Ok(None)
            }
        }
    }

    async fn persist_token(&self, token: &CachedToken) -> Result<(), ApiError> {
        let record = serde_json::to_string(token).map_err(crate::store::StoreError::from)?;
        self.store
            .set(ACCESS_TOKEN_ENTRY, &Secret::new(record))
            .await?;
        tracing::debug!("Cached access token until {}", token.expires_at);
        Ok(())
    }

    /// Whether a long-lived secret is stored.
    pub async fn has_secret(&self) -> Result<bool, ApiError> {
        Ok(self.store.exists(API_KEY_ENTRY).await?)
    }

    /// Exchange a long-lived secret for a fresh access token.
    ///
    /// The token is not persisted; callers decide whether to cache it.
    pub async fn exchange_secret_for_token(&self, secret: &Secret) -> Result<CachedToken, ApiError> {
        let url = self.config.url_for(TOKEN_PATH)?;

        tracing::info!("Requesting access token from {}", url);

        let response = self
            .http_client
            .post(url)
            .json(&TokenRequest {
                validity_in_minutes: self.settings().validity_minutes,
                secret: secret.expose(),
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body = response.bytes().await?;
            let parsed: TokenResponse = serde_json::from_slice(&body)?;
            return Ok(CachedToken::issued_now(
                parsed.access_token,
                self.settings().validity_minutes,
            ));
        }

        let retry_after = parse_retry_after(response.headers());
        let body = response.bytes().await.unwrap_or_default();
        let message = server_message(status.as_u16(), &body);

        tracing::warn!(status = status.as_u16(), "Token exchange rejected: {}", message);

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ApiError::authentication("Invalid API key")
            }
            StatusCode::TOO_MANY_REQUESTS => ApiError::rate_limited(
                "Rate limited while fetching token",
                retry_after.unwrap_or(self.settings().default_rate_limit_wait),
            ),
            s if s.is_server_error() => ApiError::api(
                format!("Server error while fetching token: {}", message),
                Some(s.as_u16()),
                true,
            ),
            s => ApiError::api(
                format!("Failed to get access token: {}", message),
                Some(s.as_u16()),
                false,
            ),
        })
    }

    /// Validate a candidate secret and store it.
    ///
    /// The secret is only written once the issuing endpoint accepted it; the
    /// token obtained along the way is cached.
    pub async fn login(&self, secret: &Secret) -> Result<CachedToken, ApiError> {
        let token = self.exchange_secret_for_token(secret).await?;
        self.persist_token(&token).await?;
        self.store.set(API_KEY_ENTRY, secret).await?;
        tracing::info!("Stored API key");
        Ok(token)
    }

    /// Remove the secret and the cached token.
    ///
    /// Returns whether a secret had been stored.
    pub async fn logout(&self) -> Result<bool, ApiError> {
        let had_secret = self.store.delete(API_KEY_ENTRY).await?;
        self.invalidate_cached().await?;
        Ok(had_secret)
    }

    async fn invalidate_cached(&self) -> Result<(), ApiError> {
        if self.store.delete(ACCESS_TOKEN_ENTRY).await? {
            tracing::info!("Invalidated cached access token");
        }
        Ok(())
    }
}

#[async_trait]
impl<S: SecretStore + 'static> TokenProvider for DefaultTokenManager<S> {
    async fn get_valid_token(&self, force_refresh: bool) -> Result<CachedToken, ApiError> {
        if !force_refresh {
            if let Some(token) = self.cached_token().await? {
                if !token.expires_within(self.settings().expiry_buffer) {
                    tracing::debug!("Using cached access token");
                    return Ok(token);
                }
                tracing::debug!("Cached access token is within its expiry buffer");
            }
        }

        let secret = self
            .store
            .get(API_KEY_ENTRY)
            .await?
            .ok_or_else(|| ApiError::authentication(NOT_AUTHENTICATED))?;

        let token = self.exchange_secret_for_token(&secret).await?;
        self.persist_token(&token).await?;
        Ok(token)
    }

    async fn invalidate(&self) -> Result<(), ApiError> {
        self.invalidate_cached().await
    }
}
