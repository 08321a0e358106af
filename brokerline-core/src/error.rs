//! Error taxonomy surfaced by the token manager and the request executor.
//!
//! Every failure carries a human-readable message, the HTTP status when one
//! exists, and a retryable flag. Callers only pick a user-facing message from
//! [`ApiError::kind`]; they never re-wrap the error.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::store::StoreError;

/// Coarse classification used by callers to choose how to present a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The user has to authenticate again.
    Authentication,
    /// The server asked us to slow down.
    RateLimit,
    /// The addressed resource does not exist.
    NotFound,
    /// Any other response the server rejected.
    Api,
    /// The request never produced a usable response.
    Transport,
    /// The credential store failed.
    Store,
    /// Invalid endpoint or request path.
    Config,
}

/// Errors produced while talking to the trading API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Generic API failure. `retryable` is set for 5xx responses.
    #[error("{message}")]
    Api {
        message: String,
        status: Option<u16>,
        retryable: bool,
    },

    /// Credentials are missing or were rejected.
    #[error("{message}")]
    Authentication { message: String },

    /// The server rate limited the request.
    #[error("{message}")]
    RateLimited {
        message: String,
        retry_after: Duration,
    },

    /// The server reported 404 for the addressed resource.
    #[error("{message}")]
    NotFound { message: String },

    /// Connection refused, timeout, or an unreadable response.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// A successful response whose body did not decode as the expected payload.
    #[error("malformed response: {0}")]
    MalformedResponse(#[from] serde_json::Error),

    /// The credential store could not be read or written.
    #[error("credential store error: {0}")]
    Store(#[from] StoreError),

    /// The endpoint or request path could not be turned into a URL.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl ApiError {
    /// Build a generic API error.
    pub fn api(message: impl Into<String>, status: Option<u16>, retryable: bool) -> Self {
        Self::Api {
            message: message.into(),
            status,
            retryable,
        }
    }

    /// Build an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Build a rate-limit error carrying the suggested wait.
    pub fn rate_limited(message: impl Into<String>, retry_after: Duration) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after,
        }
    }

    /// Build a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Api { .. } => ErrorKind::Api,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Transport(_) | Self::MalformedResponse(_) => ErrorKind::Transport,
            Self::Store(_) => ErrorKind::Store,
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    /// HTTP status associated with the failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => *status,
            Self::Authentication { .. } => Some(401),
            Self::RateLimited { .. } => Some(429),
            Self::NotFound { .. } => Some(404),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::MalformedResponse(_) | Self::Store(_) | Self::Config { .. } => None,
        }
    }

    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { retryable, .. } => *retryable,
            Self::RateLimited { .. } | Self::Transport(_) | Self::MalformedResponse(_) => true,
            Self::Authentication { .. }
            | Self::NotFound { .. }
            | Self::Store(_)
            | Self::Config { .. } => false,
        }
    }

    /// Suggested wait before retrying; only rate-limit errors carry one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Failure body convention shared by every endpoint.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

/// Pick the server-provided message out of an error body, falling back to
/// `HTTP <status>` when the body is not JSON or carries neither field.
pub(crate) fn server_message(status: u16, body: &[u8]) -> String {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    parsed
        .message
        .filter(|m| !m.is_empty())
        .or(parsed.error.filter(|e| !e.is_empty()))
        .unwrap_or_else(|| format!("HTTP {}", status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_retryability() {
        assert!(!ApiError::authentication("x").is_retryable());
        assert!(ApiError::rate_limited("x", Duration::from_secs(1)).is_retryable());
        assert!(!ApiError::not_found("x").is_retryable());
        assert!(ApiError::api("x", Some(503), true).is_retryable());
        assert!(!ApiError::api("x", Some(400), false).is_retryable());
    }

    #[test]
    fn test_statuses() {
        assert_eq!(ApiError::authentication("x").status(), Some(401));
        assert_eq!(
            ApiError::rate_limited("x", Duration::ZERO).status(),
            Some(429)
        );
        assert_eq!(ApiError::not_found("x").status(), Some(404));
        assert_eq!(ApiError::api("x", Some(418), false).status(), Some(418));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(ApiError::authentication("x").kind(), ErrorKind::Authentication);
        assert_eq!(ApiError::not_found("x").kind(), ErrorKind::NotFound);
        let store = ApiError::from(StoreError::Backend {
            message: "locked".into(),
        });
        assert_eq!(store.kind(), ErrorKind::Store);
        assert!(!store.is_retryable());
    }

    #[test]
    fn test_retry_after_only_on_rate_limit() {
        let err = ApiError::rate_limited("slow down", Duration::from_millis(2000));
        assert_eq!(err.retry_after(), Some(Duration::from_millis(2000)));
        assert_eq!(ApiError::api("x", Some(500), true).retry_after(), None);
    }

    #[test]
    fn test_server_message_prefers_message_then_error() {
        assert_eq!(
            server_message(404, br#"{"message":"Account 'X' not found"}"#),
            "Account 'X' not found"
        );
        assert_eq!(server_message(400, br#"{"error":"bad_request"}"#), "bad_request");
        assert_eq!(
            server_message(400, br#"{"message":"","error":"fallback"}"#),
            "fallback"
        );
        assert_eq!(server_message(502, b"<html>gateway</html>"), "HTTP 502");
        assert_eq!(server_message(400, b""), "HTTP 400");
    }

    #[test]
    fn test_display_is_message() {
        assert_eq!(
            ApiError::authentication("Invalid API key").to_string(),
            "Invalid API key"
        );
    }
}
