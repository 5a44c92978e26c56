//! Host collaborator interfaces.
//!
//! The engine never touches the environment directly. The host injects two
//! narrow capabilities: secret storage for persisted credentials and a way
//! to open a URL in the default browser. Tests use the in-memory
//! implementations below.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;

#[cfg(feature = "system-keyring")]
use crate::error::Error;

// =============================================================================
// SecretStore
// =============================================================================

/// Key/value secret storage provided by the host (e.g. the editor's secret
/// storage API). Values are opaque strings; the engine serializes its own
/// records into them. No plaintext ever touches disk through this crate.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read a secret, `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a secret, replacing any existing value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a secret. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

#[async_trait]
impl<T: SecretStore + ?Sized> SecretStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key).await
    }
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value).await
    }
    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }
}

// =============================================================================
// UrlOpener
// =============================================================================

/// Opens a URL in the user's default browser.
///
/// The login flow hands the authorization URL to this and then waits on the
/// local callback listener.
pub trait UrlOpener: Send + Sync {
    /// Open the URL externally.
    fn open(&self, url: &str) -> Result<()>;
}

// =============================================================================
// MemorySecretStore
// =============================================================================

/// In-memory secret store for tests and ephemeral sessions.
#[derive(Debug, Clone, Default)]
pub struct MemorySecretStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl MemorySecretStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored secrets.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.write().await.remove(key);
        Ok(())
    }
}

// =============================================================================
// KeyringSecretStore
// =============================================================================

/// Secret store backed by the system keyring.
///
/// Feature-gated behind `system-keyring`.
#[cfg(feature = "system-keyring")]
#[derive(Debug, Clone)]
pub struct KeyringSecretStore {
    service: String,
}

#[cfg(feature = "system-keyring")]
impl Default for KeyringSecretStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "system-keyring")]
impl KeyringSecretStore {
    /// Service name used for keyring entries.
    const SERVICE_NAME: &str = "cloudcode-auth";

    /// Create a store with the default service name.
    pub fn new() -> Self {
        Self {
            service: Self::SERVICE_NAME.to_string(),
        }
    }

    /// Create a store with a custom service name.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, key)
            .map_err(|e| Error::Storage(format!("Failed to create keyring entry: {}", e)))
    }
}

#[cfg(feature = "system-keyring")]
#[async_trait]
impl SecretStore for KeyringSecretStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entry = self.entry(key)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::Storage(format!("Keyring error: {}", e))),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let entry = self.entry(key)?;
        entry
            .set_password(value)
            .map_err(|e| Error::Storage(format!("Keyring error: {}", e)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let entry = self.entry(key)?;
        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::Storage(format!("Keyring error: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemorySecretStore::new();
        assert!(store.get("token").await.unwrap().is_none());

        store.set("token", "secret-value").await.unwrap();
        assert_eq!(
            store.get("token").await.unwrap().as_deref(),
            Some("secret-value")
        );

        store.delete("token").await.unwrap();
        assert!(store.get("token").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_delete_missing_is_ok() {
        let store = MemorySecretStore::new();
        store.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_store_overwrite() {
        let store = MemorySecretStore::new();
        store.set("k", "v1").await.unwrap();
        store.set("k", "v2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_memory_store_clone_shares_state() {
        let a = MemorySecretStore::new();
        let b = a.clone();
        a.set("k", "v").await.unwrap();
        assert_eq!(b.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_arc_blanket_impl() {
        let store: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
