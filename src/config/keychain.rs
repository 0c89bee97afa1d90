//! Keychain Integration
//!
//! Secret store for host passwords, identity private keys and passphrases.
//! The OS keychain backend uses the `keyring` crate; `MemorySecretStore` keeps
//! secrets in-process for tests and headless builds.

use async_trait::async_trait;
use dashmap::DashMap;

/// Default service name for keychain entries
pub const SERVICE_NAME: &str = "com.labonair.hosts";

/// Keychain errors
#[derive(Debug, thiserror::Error)]
pub enum KeychainError {
    #[cfg(feature = "keychain")]
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Keychain verification failed for ID: {0}")]
    VerificationFailed(String),
}

/// Opaque key/value secret storage
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<(), KeychainError>;

    async fn get(&self, key: &str) -> Result<Option<String>, KeychainError>;

    /// Remove a secret. Removing an absent secret is not an error.
    async fn delete(&self, key: &str) -> Result<(), KeychainError>;
}

/// Derives namespaced secret keys from entity ids
///
/// `<namespace>.<entityKind>.<id>` and `<namespace>.<entityKind>.passphrase.<id>`
#[derive(Debug, Clone)]
pub struct SecretKeys {
    namespace: String,
}

impl SecretKeys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Password slot of a host
    pub fn host(&self, id: &str) -> String {
        format!("{}.host.{}", self.namespace, id)
    }

    /// Primary slot of an identity (private key text or password)
    pub fn identity(&self, id: &str) -> String {
        format!("{}.identity.{}", self.namespace, id)
    }

    /// Passphrase slot of an identity's private key
    pub fn identity_passphrase(&self, id: &str) -> String {
        format!("{}.identity.passphrase.{}", self.namespace, id)
    }
}

/// OS keychain secret store
#[cfg(feature = "keychain")]
pub struct Keychain {
    service: String,
}

#[cfg(feature = "keychain")]
impl Keychain {
    /// Create a new keychain manager
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }

    /// Create with custom service name (for testing)
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, id: &str) -> Result<keyring::Entry, KeychainError> {
        // Explicit username keeps the keychain identity stable on macOS
        let username = whoami::username();
        Ok(keyring::Entry::new(
            &self.service,
            &format!("{}@{}", username, id),
        )?)
    }

    /// Store a secret and read it back to verify
    pub fn store(&self, id: &str, secret: &str) -> Result<(), KeychainError> {
        tracing::debug!("Keychain store: service={}, id={}", self.service, id);
        let entry = self.entry(id)?;
        entry.set_password(secret).map_err(|e| {
            tracing::error!("Keychain store failed: id={}, error={:?}", id, e);
            KeychainError::Keyring(e)
        })?;

        match entry.get_password() {
            Ok(read_back) if read_back == secret => Ok(()),
            Ok(_) => {
                tracing::error!("Keychain store verification failed: content mismatch");
                Err(KeychainError::VerificationFailed(id.to_string()))
            }
            Err(e) => {
                tracing::error!("Keychain store verification failed: {:?}", e);
                Err(KeychainError::Keyring(e))
            }
        }
    }

    /// Retrieve a secret from the keychain
    pub fn load(&self, id: &str) -> Result<Option<String>, KeychainError> {
        match self.entry(id)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => {
                tracing::debug!("Keychain get: no entry for id={}", id);
                Ok(None)
            }
            Err(e) => {
                tracing::error!("Keychain get failed: id={}, error={:?}", id, e);
                Err(KeychainError::Keyring(e))
            }
        }
    }

    /// Delete a secret from the keychain
    pub fn remove(&self, id: &str) -> Result<(), KeychainError> {
        match self.entry(id)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()), // Already deleted
            Err(e) => Err(KeychainError::Keyring(e)),
        }
    }
}

#[cfg(feature = "keychain")]
impl Default for Keychain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "keychain")]
#[async_trait]
impl SecretStore for Keychain {
    async fn set(&self, key: &str, value: &str) -> Result<(), KeychainError> {
        self.store(key, value)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KeychainError> {
        self.load(key)
    }

    async fn delete(&self, key: &str) -> Result<(), KeychainError> {
        self.remove(key)
    }
}

/// In-process secret store
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: DashMap<String, String>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.secrets.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn set(&self, key: &str, value: &str) -> Result<(), KeychainError> {
        self.secrets.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KeychainError> {
        Ok(self.secrets.get(key).map(|v| v.value().clone()))
    }

    async fn delete(&self, key: &str) -> Result<(), KeychainError> {
        self.secrets.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_keys() {
        let keys = SecretKeys::new("labonair");
        assert_eq!(keys.host("h1"), "labonair.host.h1");
        assert_eq!(keys.identity("i1"), "labonair.identity.i1");
        assert_eq!(
            keys.identity_passphrase("i1"),
            "labonair.identity.passphrase.i1"
        );
    }

    #[tokio::test]
    async fn test_memory_store_delete_is_idempotent() {
        let store = MemorySecretStore::new();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    // Note: interacts with the real system keychain under a test service name
    #[cfg(feature = "keychain")]
    #[tokio::test]
    #[ignore] // Run manually: cargo test keychain -- --ignored
    async fn test_keychain_operations() {
        let keychain = Keychain::with_service("com.labonair.test");
        let id = format!("labonair.host.{}", uuid::Uuid::new_v4());

        keychain.set(&id, "test-secret").await.unwrap();
        assert_eq!(keychain.get(&id).await.unwrap().as_deref(), Some("test-secret"));

        keychain.delete(&id).await.unwrap();
        assert_eq!(keychain.get(&id).await.unwrap(), None);
    }
}
