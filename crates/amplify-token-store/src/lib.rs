//! Token persistence for the Amplify auth engine.
//!
//! This crate owns the [`Account`] session record and the [`TokenStore`]
//! contract with three backends:
//!
//! - [`MemoryStore`]: process-local, nothing touches disk.
//! - [`FileStore`]: one AES-128-CBC encrypted file under a built-in key.
//! - [`SecureStore`]: same file format, random key held by the OS keychain.
//!
//! # Modules
//!
//! - [`account`]: the persisted session model and expiry helpers.
//! - [`crypto`]: the hex/AES-128-CBC file codec and random key generation.
//! - [`keychain`]: OS secret manager integration for the secure store key.
//! - [`store`]: the [`TokenStore`] trait, [`purge`](store::purge) and the
//!   backends.
//! - [`error`]: unified error type.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use amplify_token_store::{AccountQuery, FileStore, StoreOptions, TokenStore};
//!
//! # async fn example() -> amplify_token_store::Result<()> {
//! let dir = std::path::Path::new("/home/me/.axway/auth");
//! let store = FileStore::new(Some(dir), StoreOptions::default())?;
//!
//! for account in store.list().await? {
//!     println!("{} ({})", account.name, account.auth.base_url);
//! }
//!
//! let found = store.get(&AccountQuery::by_name("cli:me@example.com")).await?;
//! # let _ = found;
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod crypto;
pub mod error;
pub mod keychain;
pub mod store;

pub use account::{Account, AccountAuth, AccountOrg, AccountUser, Expiry, Tokens, now_ms};
pub use error::{Result, TokenStoreError};
pub use keychain::{KeychainProvider, KeyringKeychain, MemoryKeychain};
pub use store::{AccountQuery, FileStore, MemoryStore, SecureStore, StoreOptions, TokenStore, purge};
