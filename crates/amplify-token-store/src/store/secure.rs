//! File store whose key lives in the OS secret manager.
//!
//! Same on-disk format as [`FileStore`]; only key management differs. The
//! AES key is 16 random bytes generated on first use and kept in the
//! keychain under a configurable service name.

use std::path::Path;

use async_trait::async_trait;

use super::{AccountQuery, FileStore, StoreOptions, TokenStore};
use crate::account::Account;
use crate::error::{Result, TokenStoreError};
use crate::keychain::{KeychainProvider, KeyringKeychain, load_or_create_key};

/// File name used by the secure store.
pub const SECURE_STORE_FILENAME: &str = ".tokenstore.secure.v2";

/// Default keychain service name.
pub const DEFAULT_SERVICE_NAME: &str = "Axway AMPLIFY Auth";

/// Encrypted file store keyed from the OS keychain.
pub struct SecureStore {
    inner: FileStore,
}

impl SecureStore {
    /// Open the store in `dir` using the platform secret manager.
    ///
    /// # Errors
    ///
    /// - [`crate::TokenStoreError::SecretStoreUnavailable`] if the platform
    ///   secret manager cannot be used.
    /// - [`crate::TokenStoreError::MissingRequiredParameter`] if `dir` is
    ///   `None`.
    pub fn new(dir: Option<&Path>, service_name: &str, options: StoreOptions) -> Result<Self> {
        require_dir(dir)?;
        let keychain = KeyringKeychain::new(service_name)?;
        Self::with_keychain(dir, &keychain, options)
    }

    /// Open the store in `dir` with the key held by `keychain`.
    pub fn with_keychain(
        dir: Option<&Path>,
        keychain: &dyn KeychainProvider,
        options: StoreOptions,
    ) -> Result<Self> {
        // A missing directory must not leave a freshly generated key behind.
        require_dir(dir)?;
        let key = load_or_create_key(keychain)?;
        let inner = FileStore::with_key(dir, SECURE_STORE_FILENAME, key, options)?;
        Ok(Self { inner })
    }

    /// Location of the store file.
    pub fn path(&self) -> &Path {
        self.inner.path()
    }
}

fn require_dir(dir: Option<&Path>) -> Result<()> {
    match dir {
        Some(_) => Ok(()),
        None => Err(TokenStoreError::MissingRequiredParameter {
            name: "token_store_dir".into(),
        }),
    }
}

#[async_trait]
impl TokenStore for SecureStore {
    fn kind(&self) -> &'static str {
        "secure"
    }

    async fn list(&self) -> Result<Vec<Account>> {
        self.inner.list().await
    }

    async fn get(&self, query: &AccountQuery) -> Result<Option<Account>> {
        self.inner.get(query).await
    }

    async fn set(&self, account: Account) -> Result<()> {
        self.inner.set(account).await
    }

    async fn delete(&self, accounts: &[String], base_url: Option<&str>) -> Result<Vec<Account>> {
        self.inner.delete(accounts, base_url).await
    }

    async fn clear(&self, base_url: Option<&str>) -> Result<Vec<Account>> {
        self.inner.clear(base_url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::fixtures::account;
    use crate::keychain::MemoryKeychain;

    #[tokio::test]
    async fn roundtrip_with_same_keychain() {
        let dir = tempfile::tempdir().unwrap();
        let keychain = MemoryKeychain::new();
        let acct = account("a", "https://x", 60_000, None);

        let store =
            SecureStore::with_keychain(Some(dir.path()), &keychain, StoreOptions::default())
                .unwrap();
        store.set(acct.clone()).await.unwrap();
        assert!(store.path().ends_with(SECURE_STORE_FILENAME));

        let reopened =
            SecureStore::with_keychain(Some(dir.path()), &keychain, StoreOptions::default())
                .unwrap();
        assert_eq!(reopened.list().await.unwrap(), vec![acct]);
    }

    #[tokio::test]
    async fn different_key_self_heals() {
        let dir = tempfile::tempdir().unwrap();

        let first = MemoryKeychain::new();
        let store =
            SecureStore::with_keychain(Some(dir.path()), &first, StoreOptions::default()).unwrap();
        store.set(account("a", "https://x", 60_000, None)).await.unwrap();

        let second = MemoryKeychain::new();
        let foreign =
            SecureStore::with_keychain(Some(dir.path()), &second, StoreOptions::default()).unwrap();
        assert!(foreign.list().await.unwrap().is_empty());
        assert!(!foreign.path().exists());
    }

    #[test]
    fn missing_dir_does_not_create_key() {
        let keychain = MemoryKeychain::new();
        let result = SecureStore::with_keychain(None, &keychain, StoreOptions::default());
        assert!(matches!(
            result,
            Err(TokenStoreError::MissingRequiredParameter { .. })
        ));
        assert!(matches!(keychain.get_key(), Err(TokenStoreError::KeyNotFound)));
    }
}
