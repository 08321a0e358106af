//! OS keychain backend.
//!
//! Each logical key is one keyring entry: the service is the store's
//! namespace and the user is the key. Keyring calls block (D-Bus, Security
//! framework), so they run on the blocking thread pool.
//!
//! Native backends are only linked with the `native-keyring` feature;
//! otherwise the keyring crate only has its in-process mock, which
//! [`KeyringStore::try_new`] rejects.

use async_trait::async_trait;
use keyring::Entry;

use super::{Secret, SecretStore, StoreError};

/// Entry written and read back when a store is opened.
const CHECK_ENTRY: &str = "availability-check";

pub struct KeyringStore {
    namespace: String,
}

impl KeyringStore {
    /// Open the keychain under `namespace`.
    ///
    /// Fails with [`StoreError::Unavailable`] unless a value written through
    /// one entry handle can be read back through another. The keyring mock
    /// and some headless secret services accept writes and then drop them.
    /// This call blocks on the platform keyring.
    pub fn try_new(namespace: &str) -> Result<Self, StoreError> {
        check_round_trip(namespace).map_err(|message| StoreError::Unavailable { message })?;

        Ok(Self {
            namespace: namespace.to_owned(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn with_entry<T, F>(&self, key: &str, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Entry) -> keyring::Result<T> + Send + 'static,
    {
        let entry = Entry::new(&self.namespace, key).map_err(|e| StoreError::Backend {
            message: format!("invalid keyring entry '{}': {}", key, e),
        })?;

        tokio::task::spawn_blocking(move || op(&entry))
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("keyring task failed: {}", e),
            })?
            .map_err(|e| classify(key, e))
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("namespace", &self.namespace)
            .finish()
    }
}

fn check_round_trip(namespace: &str) -> Result<(), String> {
    let marker = format!("brokerline-check-{}", std::process::id());

    let writer = Entry::new(namespace, CHECK_ENTRY)
        .map_err(|e| format!("OS keyring cannot be opened: {}", e))?;
    writer
        .set_password(&marker)
        .map_err(|e| format!("OS keyring rejected a write: {}", e))?;

    let read_back = Entry::new(namespace, CHECK_ENTRY).and_then(|reader| reader.get_password());

    if let Err(e) = writer.delete_credential() {
        tracing::debug!(error = %e, "Could not remove keyring check entry");
    }

    match read_back {
        Ok(value) if value == marker => Ok(()),
        Ok(_) | Err(keyring::Error::NoEntry) => {
            Err("OS keyring does not persist entries".to_string())
        }
        Err(e) => Err(format!("OS keyring cannot be read: {}", e)),
    }
}

fn classify(key: &str, err: keyring::Error) -> StoreError {
    match err {
        keyring::Error::NoStorageAccess(_) => StoreError::Locked {
            entry: key.to_owned(),
        },
        keyring::Error::PlatformFailure(e) => StoreError::Backend {
            message: format!("platform keyring failure on '{}': {}", key, e),
        },
        other => StoreError::Backend {
            message: format!("keyring error on '{}': {}", key, other),
        },
    }
}

#[async_trait]
impl SecretStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        self.with_entry(key, |entry| match entry.get_password() {
            Ok(value) => Ok(Some(Secret::new(value))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        let secret = secret.clone();
        self.with_entry(key, move |entry| entry.set_password(secret.expose()))
            .await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.with_entry(key, |entry| match entry.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(e),
        })
        .await
    }
}
