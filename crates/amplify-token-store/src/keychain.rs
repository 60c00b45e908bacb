//! OS keychain integration for the secure store's encryption key.
//!
//! The secure store never writes its AES key to disk. This module provides a
//! [`KeychainProvider`] trait over the places the key can live:
//!
//! - [`KeyringKeychain`]: the platform secret manager (macOS Keychain,
//!   Windows Credential Manager, Linux Secret Service with a keyutils cache) via `keyring`.
//! - [`MemoryKeychain`]: a process-local map, for tests and for embedding
//!   hosts that manage key material themselves.
//!
//! Keys are stored hex-encoded because secret managers store strings.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::crypto::{self, KEY_LEN};
use crate::error::{Result, TokenStoreError};

/// Account name under which the key is stored inside the service.
pub const KEY_ACCOUNT: &str = "key";

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over secure key storage.
pub trait KeychainProvider: Send + Sync {
    /// Retrieve the stored key.
    ///
    /// Returns [`TokenStoreError::KeyNotFound`] if no key has been stored yet.
    fn get_key(&self) -> Result<Vec<u8>>;

    /// Store (or overwrite) the key.
    fn set_key(&self, key: &[u8]) -> Result<()>;
}

/// Load the store key from `keychain`, generating and saving a random one on
/// first use.
///
/// A stored value of the wrong length is replaced with a fresh key, which
/// makes any file encrypted under the old value unreadable (the file store
/// then deletes it).
pub fn load_or_create_key(keychain: &dyn KeychainProvider) -> Result<[u8; KEY_LEN]> {
    match keychain.get_key() {
        Ok(bytes) if bytes.len() == KEY_LEN => {
            let mut key = [0u8; KEY_LEN];
            key.copy_from_slice(&bytes);
            Ok(key)
        }
        Ok(bytes) => {
            tracing::warn!(
                len = bytes.len(),
                "stored token store key has wrong length, regenerating"
            );
            create_key(keychain)
        }
        Err(TokenStoreError::KeyNotFound) => create_key(keychain),
        Err(e) => Err(e),
    }
}

fn create_key(keychain: &dyn KeychainProvider) -> Result<[u8; KEY_LEN]> {
    let key = crypto::random_key()?;
    keychain.set_key(&key)?;
    tracing::info!("generated new token store key");
    Ok(key)
}

// ---------------------------------------------------------------------------
// Platform secret manager
// ---------------------------------------------------------------------------

/// Platform secret manager backed by the `keyring` crate.
pub struct KeyringKeychain {
    entry: keyring::Entry,
    service_name: String,
}

impl KeyringKeychain {
    /// Open the keychain entry `service_name`/[`KEY_ACCOUNT`].
    ///
    /// # Errors
    ///
    /// Returns [`TokenStoreError::SecretStoreUnavailable`] if the platform
    /// has no usable secret manager.
    pub fn new(service_name: &str) -> Result<Self> {
        let entry = keyring::Entry::new(service_name, KEY_ACCOUNT).map_err(|e| {
            TokenStoreError::SecretStoreUnavailable {
                reason: format!("cannot open keychain entry: {e}"),
            }
        })?;

        Ok(Self {
            entry,
            service_name: service_name.to_string(),
        })
    }

    /// The service name this keychain writes under.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

fn unavailable(action: &str, e: keyring::Error) -> TokenStoreError {
    TokenStoreError::SecretStoreUnavailable {
        reason: format!("keychain {action} failed: {e}"),
    }
}

impl KeychainProvider for KeyringKeychain {
    fn get_key(&self) -> Result<Vec<u8>> {
        match self.entry.get_password() {
            Ok(encoded) => {
                tracing::debug!(
                    service = %self.service_name,
                    "retrieved token store key from keychain"
                );
                // An undecodable value is treated like a wrong-length key.
                Ok(hex::decode(encoded.trim()).unwrap_or_default())
            }
            Err(keyring::Error::NoEntry) => Err(TokenStoreError::KeyNotFound),
            Err(e) => Err(unavailable("read", e)),
        }
    }

    fn set_key(&self, key: &[u8]) -> Result<()> {
        self.entry
            .set_password(&hex::encode(key))
            .map_err(|e| unavailable("write", e))?;
        tracing::info!(service = %self.service_name, "stored token store key in keychain");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory keychain
// ---------------------------------------------------------------------------

/// Process-local keychain. Keys vanish when the process exits.
#[derive(Default)]
pub struct MemoryKeychain {
    keys: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.keys
            .lock()
            .map_err(|e| TokenStoreError::Internal(format!("keychain lock poisoned: {e}")))
    }
}

impl KeychainProvider for MemoryKeychain {
    fn get_key(&self) -> Result<Vec<u8>> {
        self.lock()?
            .get(KEY_ACCOUNT)
            .cloned()
            .ok_or(TokenStoreError::KeyNotFound)
    }

    fn set_key(&self, key: &[u8]) -> Result<()> {
        self.lock()?.insert(KEY_ACCOUNT.to_string(), key.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_keychain_roundtrip() {
        let keychain = MemoryKeychain::new();
        assert!(matches!(keychain.get_key(), Err(TokenStoreError::KeyNotFound)));

        keychain.set_key(b"0123456789abcdef").unwrap();
        assert_eq!(keychain.get_key().unwrap(), b"0123456789abcdef");

        keychain.set_key(b"fedcba9876543210").unwrap();
        assert_eq!(keychain.get_key().unwrap(), b"fedcba9876543210");
    }

    #[test]
    fn load_or_create_generates_once() {
        let keychain = MemoryKeychain::new();
        let first = load_or_create_key(&keychain).unwrap();
        let second = load_or_create_key(&keychain).unwrap();
        assert_eq!(first, second);
        assert_eq!(keychain.get_key().unwrap(), first.to_vec());
    }

    #[test]
    fn load_or_create_replaces_wrong_length_key() {
        let keychain = MemoryKeychain::new();
        keychain.set_key(b"short").unwrap();

        let key = load_or_create_key(&keychain).unwrap();
        assert_eq!(key.len(), KEY_LEN);
        assert_eq!(keychain.get_key().unwrap(), key.to_vec());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_keychain_survives_reboot() {
        use keyring::credential::CredentialPersistence;

        let persistence = keyring::default::default_credential_builder().persistence();
        assert!(matches!(persistence, CredentialPersistence::UntilDelete));
    }

    struct BrokenKeychain;

    impl KeychainProvider for BrokenKeychain {
        fn get_key(&self) -> Result<Vec<u8>> {
            Err(TokenStoreError::SecretStoreUnavailable {
                reason: "no secret service".into(),
            })
        }
        fn set_key(&self, _key: &[u8]) -> Result<()> {
            unreachable!()
        }
    }

    #[test]
    fn load_or_create_propagates_unavailable() {
        let result = load_or_create_key(&BrokenKeychain);
        assert!(matches!(
            result,
            Err(TokenStoreError::SecretStoreUnavailable { .. })
        ));
    }
}
