//! Credential store adapter.
//!
//! Everything the client persists lives under the [`SERVICE_NAME`] namespace
//! as two string entries:
//!
//! | entry                  | value                                                 |
//! |------------------------|-------------------------------------------------------|
//! | [`API_KEY_ENTRY`]      | the long-lived API secret                             |
//! | [`ACCESS_TOKEN_ENTRY`] | `{"accessToken": "...", "expiresAt": <epoch millis>}` |
//!
//! Backends implement [`SecretStore`]. [`KeyringStore`] talks to the OS
//! keychain; [`MemoryStore`] keeps entries for the lifetime of the process
//! and backs the tests.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

#[cfg(feature = "keyring-store")]
mod keyring;
mod memory;

#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;
pub use memory::MemoryStore;

/// Keychain service every entry is filed under.
pub const SERVICE_NAME: &str = "brokerline";

/// Entry holding the long-lived API secret.
pub const API_KEY_ENTRY: &str = "api-key";

/// Entry holding the serialized [`CachedToken`](crate::token::CachedToken).
pub const ACCESS_TOKEN_ENTRY: &str = "access-token";

/// Credential material that must not end up in logs.
///
/// `Debug` and `Display` print a placeholder; [`Secret::expose`] is the only
/// way to the value. The buffer is zeroed on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Secret").field(&"<redacted>").finish()
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Failures of a credential backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The OS refused access to an entry (locked keychain, denied prompt).
    #[error("access to credential entry '{entry}' was denied")]
    Locked { entry: String },

    /// The backend failed while reading or writing an entry.
    #[error("credential backend failure: {message}")]
    Backend { message: String },

    /// A stored record could not be encoded.
    #[error("could not encode credential record: {0}")]
    Encoding(#[from] serde_json::Error),

    /// No backend could be opened.
    #[error("credential backend unavailable: {message}")]
    Unavailable { message: String },
}

/// Key/value persistence for credentials.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read an entry; `None` when it was never written or has been deleted.
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Write an entry, replacing any previous value.
    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError>;

    /// Remove an entry. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

#[async_trait]
impl<T: SecretStore + ?Sized> SecretStore for Box<T> {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        (**self).set(key, secret).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        (**self).delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        (**self).exists(key).await
    }
}

/// Store picked by [`create_store`].
pub struct OpenedStore {
    pub store: Box<dyn SecretStore>,
    /// Why the keychain was passed over when it was preferred.
    pub fallback: Option<StoreError>,
}

impl OpenedStore {
    /// Whether a preferred keychain was replaced by the memory store.
    pub fn fell_back(&self) -> bool {
        self.fallback.is_some()
    }
}

impl fmt::Debug for OpenedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedStore")
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

/// Open the credential store the CLI should use.
///
/// With `prefer_keyring` the OS keychain is tried first. When it cannot be
/// opened, does not keep what is written to it, or the crate was built
/// without `keyring-store`, entries are kept in memory and the reason is
/// returned in [`OpenedStore::fallback`] so the caller can tell the user.
pub fn create_store(prefer_keyring: bool) -> OpenedStore {
    select_store(prefer_keyring, open_keyring)
}

fn select_store<F>(prefer_keyring: bool, open: F) -> OpenedStore
where
    F: FnOnce() -> Result<Box<dyn SecretStore>, StoreError>,
{
    let fallback = if prefer_keyring {
        match open() {
            Ok(store) => {
                tracing::debug!(service = SERVICE_NAME, "Using OS keyring for credentials");
                return OpenedStore {
                    store,
                    fallback: None,
                };
            }
            Err(e) => {
                tracing::debug!(error = %e, "OS keyring rejected, falling back to memory");
                Some(e)
            }
        }
    } else {
        None
    };

    tracing::debug!("Using in-memory credential store");
    OpenedStore {
        store: Box::new(MemoryStore::new()),
        fallback,
    }
}

#[cfg(feature = "keyring-store")]
fn open_keyring() -> Result<Box<dyn SecretStore>, StoreError> {
    Ok(Box::new(KeyringStore::try_new(SERVICE_NAME)?))
}

#[cfg(not(feature = "keyring-store"))]
fn open_keyring() -> Result<Box<dyn SecretStore>, StoreError> {
    Err(StoreError::Unavailable {
        message: "built without keyring support".to_string(),
    })
}
