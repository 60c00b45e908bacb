//! The [`TokenStore`] contract and its backends.
//!
//! Every backend keeps an ordered list of [`Account`]s and applies the same
//! rules on top of its own load/save primitives:
//!
//! - `set` upserts keyed by `(name, base_url)`, superseding hash-named placeholders.
//! - `list`/`get` run [`purge`] first, so dead sessions are never returned.
//! - `delete`/`clear` return the entries they removed.

mod file;
mod memory;
mod secure;

pub use file::{FILE_STORE_FILENAME, FileStore};
pub use memory::MemoryStore;
pub use secure::{DEFAULT_SERVICE_NAME, SECURE_STORE_FILENAME, SecureStore};

use std::time::Duration;

use async_trait::async_trait;

use crate::account::{Account, now_ms};
use crate::error::Result;

/// Options shared by all backends.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreOptions {
    /// A refresh token that expires within this window counts as expired.
    pub token_refresh_threshold: Duration,
}

impl StoreOptions {
    pub(crate) fn threshold_ms(&self) -> i64 {
        i64::try_from(self.token_refresh_threshold.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Selects one account for [`TokenStore::get`].
///
/// `account_name` and `hash` are alternatives: an entry matches if either
/// equals its name or hash. `base_url`, when set, must also match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountQuery {
    pub account_name: Option<String>,
    pub hash: Option<String>,
    pub base_url: Option<String>,
}

impl AccountQuery {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            account_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn by_hash(hash: impl Into<String>) -> Self {
        Self {
            hash: Some(hash.into()),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Whether `account` satisfies this query.
    pub fn matches(&self, account: &Account) -> bool {
        let identified = match (&self.account_name, &self.hash) {
            (None, None) => false,
            (name, hash) => {
                name.as_deref().is_some_and(|n| account.matches(n))
                    || hash.as_deref().is_some_and(|h| account.matches(h))
            }
        };
        identified && base_url_matches(account, self.base_url.as_deref())
    }
}

fn base_url_matches(account: &Account, base_url: Option<&str>) -> bool {
    base_url.is_none_or(|url| account.is_for_base_url(url))
}

/// Persistence contract implemented by every backend.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Short backend name: `memory`, `file` or `secure`.
    fn kind(&self) -> &'static str;

    /// All live accounts, in insertion order.
    async fn list(&self) -> Result<Vec<Account>>;

    /// The first live account matching `query`.
    async fn get(&self, query: &AccountQuery) -> Result<Option<Account>>;

    /// Insert `account`, replacing any entry with the same name and base URL
    /// and any placeholder entry (named by its hash) for the same credential.
    async fn set(&self, account: Account) -> Result<()>;

    /// Remove every entry whose name or hash is in `accounts`, optionally
    /// restricted to `base_url`. Returns the removed entries.
    async fn delete(&self, accounts: &[String], base_url: Option<&str>) -> Result<Vec<Account>>;

    /// Remove every entry, optionally restricted to `base_url`. Returns the
    /// removed entries.
    async fn clear(&self, base_url: Option<&str>) -> Result<Vec<Account>>;
}

/// Drop dead entries and refresh the derived `expired` flag on the rest.
///
/// An entry survives if its access token is still valid or its refresh
/// token stays valid for at least `threshold_ms` more.
pub fn purge(entries: Vec<Account>, threshold_ms: i64) -> Vec<Account> {
    let now = now_ms();
    entries
        .into_iter()
        .filter_map(|mut entry| {
            if entry.is_dead_at(now, threshold_ms) {
                tracing::debug!(account = %entry.name, "purging expired account");
                None
            } else {
                entry.update_expired(now);
                Some(entry)
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// List operations shared by the backends
// ---------------------------------------------------------------------------

/// Replace the entry with the same `(name, base_url)` or append.
///
/// An entry still named by its own hash is a placeholder for a session whose
/// identity was not known yet; a later entry with that hash supersedes it.
pub(crate) fn upsert(entries: &mut Vec<Account>, account: Account) {
    let supersedes = |e: &Account| {
        e.is_for_base_url(&account.auth.base_url)
            && (e.name == account.name || (e.name == e.hash && e.hash == account.hash))
    };

    let mut slot = None;
    let mut kept = 0;
    entries.retain(|e| {
        if supersedes(e) {
            if slot.is_none() {
                slot = Some(kept);
            }
            false
        } else {
            kept += 1;
            true
        }
    });

    match slot {
        Some(index) => entries.insert(index, account),
        None => entries.push(account),
    }
}

/// Split `entries` into `(kept, removed)` by `should_remove`.
pub(crate) fn partition(
    entries: Vec<Account>,
    should_remove: impl Fn(&Account) -> bool,
) -> (Vec<Account>, Vec<Account>) {
    entries.into_iter().partition(|e| !should_remove(e))
}

pub(crate) fn delete_matcher<'a>(
    accounts: &'a [String],
    base_url: Option<&'a str>,
) -> impl Fn(&Account) -> bool + 'a {
    move |entry| {
        accounts.iter().any(|a| entry.matches(a)) && base_url_matches(entry, base_url)
    }
}

pub(crate) fn clear_matcher(base_url: Option<&str>) -> impl Fn(&Account) -> bool + '_ {
    move |entry| base_url_matches(entry, base_url)
}
