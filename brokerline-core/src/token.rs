//! Short-lived access tokens.
//!
//! This module provides:
//! - [`CachedToken`] - An access token paired with its absolute expiry
//! - [`TokenProvider`] - Trait the executor uses to obtain and drop tokens

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::store::Secret;

/// An access token together with the instant it stops being valid.
///
/// Persisted as one record so the expiry is never written without its token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedToken {
    /// Bearer credential sent with resource calls.
    pub access_token: Secret,

    /// Absolute expiry, stored as epoch milliseconds.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Create a token that expires at `expires_at`.
    pub fn new(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: Secret::new(access_token),
            expires_at,
        }
    }

    /// Create a token valid for `validity_minutes` from now.
    pub fn issued_now(access_token: impl Into<String>, validity_minutes: u32) -> Self {
        Self::new(
            access_token,
            Utc::now() + chrono::Duration::minutes(i64::from(validity_minutes)),
        )
    }

    /// Whether the token has expired or will within `buffer`.
    pub fn expires_within(&self, buffer: Duration) -> bool {
        let Ok(buffer) = chrono::Duration::from_std(buffer) else {
            return true;
        };
        self.expires_at
            .checked_sub_signed(buffer)
            .is_none_or(|renew_at| Utc::now() >= renew_at)
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.expose())
    }
}

/// Source of valid access tokens for the request executor.
///
/// # Example
///
/// ```rust,ignore
/// use brokerline_core::TokenProvider;
///
/// async fn authorize(tokens: &dyn TokenProvider) -> Result<String, ApiError> {
///     let token = tokens.get_valid_token(false).await?;
///     Ok(token.bearer())
/// }
/// ```
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a token that is not about to expire.
    ///
    /// With `force_refresh` false a cached token still outside the expiry
    /// buffer is returned without any network call. Otherwise the long-lived
    /// secret is exchanged for a fresh token, which is persisted.
    async fn get_valid_token(&self, force_refresh: bool) -> Result<CachedToken, ApiError>;

    /// Drop the cached token, leaving the long-lived secret in place.
    async fn invalidate(&self) -> Result<(), ApiError>;
}
