//! Encrypted single-file token store.
//!
//! All accounts live in one file as a hex-encoded AES-128-CBC blob of the
//! JSON array (see [`crate::crypto`]). A file that cannot be decrypted or
//! parsed is deleted and treated as empty, so a store written under a
//! different key never locks the user out. An empty store removes the file.
//!
//! Writes go to a sibling temp file that is renamed over the target, and
//! every read-modify-write in this process is serialized. Separate processes
//! are not coordinated: the last writer wins.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    AccountQuery, StoreOptions, TokenStore, clear_matcher, delete_matcher, partition, purge, upsert,
};
use crate::account::Account;
use crate::crypto::{self, FILE_STORE_KEY, KEY_LEN};
use crate::error::{Result, TokenStoreError};

/// File name used by the plain file store.
pub const FILE_STORE_FILENAME: &str = ".tokenstore.v2";

/// Token store persisted to an encrypted file.
pub struct FileStore {
    path: PathBuf,
    key: [u8; KEY_LEN],
    options: StoreOptions,
    io_lock: Mutex<()>,
}

impl FileStore {
    /// Open the store in `dir`, encrypted with the built-in key.
    ///
    /// # Errors
    ///
    /// - [`TokenStoreError::MissingRequiredParameter`] if `dir` is `None`.
    /// - [`TokenStoreError::Io`] if the directory cannot be created.
    pub fn new(dir: Option<&Path>, options: StoreOptions) -> Result<Self> {
        Self::with_key(dir, FILE_STORE_FILENAME, FILE_STORE_KEY, options)
    }

    pub(crate) fn with_key(
        dir: Option<&Path>,
        filename: &str,
        key: [u8; KEY_LEN],
        options: StoreOptions,
    ) -> Result<Self> {
        let dir = dir.ok_or_else(|| TokenStoreError::MissingRequiredParameter {
            name: "token_store_dir".into(),
        })?;

        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
            }
        }

        let path = dir.join(filename);
        tracing::debug!(path = %path.display(), "opened file token store");

        Ok(Self {
            path,
            key,
            options,
            io_lock: Mutex::new(()),
        })
    }

    /// Location of the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<Account>> {
        let encoded = match tokio::fs::read_to_string(&self.path).await {
            Ok(encoded) => encoded,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        match self.decode(&encoded) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "token store file is unreadable, deleting it"
                );
                self.remove_file().await?;
                Ok(Vec::new())
            }
        }
    }

    fn decode(&self, encoded: &str) -> Result<Vec<Account>> {
        let json = crypto::decrypt_from_hex(encoded, &self.key)?;
        Ok(serde_json::from_slice(&json)?)
    }

    async fn save(&self, entries: &[Account]) -> Result<()> {
        if entries.is_empty() {
            return self.remove_file().await;
        }

        let json = serde_json::to_vec(entries)?;
        let encoded = crypto::encrypt_to_hex(&json, &self.key);

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, encoded.as_bytes()).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::debug!(path = %self.path.display(), entries = entries.len(), "saved token store");
        Ok(())
    }

    async fn remove_file(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "removed token store file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Load, purge, and write back if anything was dropped.
    async fn live_entries(&self) -> Result<Vec<Account>> {
        let entries = self.load().await?;
        let before = entries.len();
        let kept = purge(entries, self.options.threshold_ms());
        if kept.len() != before {
            self.save(&kept).await?;
        }
        Ok(kept)
    }
}

#[async_trait]
impl TokenStore for FileStore {
    fn kind(&self) -> &'static str {
        "file"
    }

    async fn list(&self) -> Result<Vec<Account>> {
        let _guard = self.io_lock.lock().await;
        self.live_entries().await
    }

    async fn get(&self, query: &AccountQuery) -> Result<Option<Account>> {
        let _guard = self.io_lock.lock().await;
        Ok(self
            .live_entries()
            .await?
            .into_iter()
            .find(|entry| query.matches(entry)))
    }

    async fn set(&self, account: Account) -> Result<()> {
        let _guard = self.io_lock.lock().await;
        let mut entries = self.load().await?;
        tracing::debug!(account = %account.name, path = %self.path.display(), "storing account");
        upsert(&mut entries, account);
        self.save(&entries).await
    }

    async fn delete(&self, accounts: &[String], base_url: Option<&str>) -> Result<Vec<Account>> {
        let _guard = self.io_lock.lock().await;
        let (kept, removed) = partition(self.load().await?, delete_matcher(accounts, base_url));
        if !removed.is_empty() {
            self.save(&kept).await?;
        }
        Ok(removed)
    }

    async fn clear(&self, base_url: Option<&str>) -> Result<Vec<Account>> {
        let _guard = self.io_lock.lock().await;
        let (kept, removed) = partition(self.load().await?, clear_matcher(base_url));
        if !removed.is_empty() {
            self.save(&kept).await?;
        }
        Ok(removed)
    }
}
