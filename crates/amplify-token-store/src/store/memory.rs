//! Process-local token store.

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    AccountQuery, StoreOptions, TokenStore, clear_matcher, delete_matcher, partition, purge, upsert,
};
use crate::account::Account;
use crate::error::Result;

/// Keeps accounts in memory only. Used for tests and for service-account
/// sessions that should not outlive the process.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<Account>>,
    options: StoreOptions,
}

impl MemoryStore {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            options,
        }
    }

    /// Purge the in-memory list and return a copy of what survived.
    async fn live_entries(&self) -> Vec<Account> {
        let mut entries = self.entries.lock().await;
        let kept = purge(std::mem::take(&mut *entries), self.options.threshold_ms());
        *entries = kept.clone();
        kept
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn list(&self) -> Result<Vec<Account>> {
        Ok(self.live_entries().await)
    }

    async fn get(&self, query: &AccountQuery) -> Result<Option<Account>> {
        Ok(self
            .live_entries()
            .await
            .into_iter()
            .find(|entry| query.matches(entry)))
    }

    async fn set(&self, account: Account) -> Result<()> {
        tracing::debug!(account = %account.name, "storing account in memory");
        upsert(&mut *self.entries.lock().await, account);
        Ok(())
    }

    async fn delete(&self, accounts: &[String], base_url: Option<&str>) -> Result<Vec<Account>> {
        let mut entries = self.entries.lock().await;
        let (kept, removed) =
            partition(std::mem::take(&mut *entries), delete_matcher(accounts, base_url));
        *entries = kept;
        Ok(removed)
    }

    async fn clear(&self, base_url: Option<&str>) -> Result<Vec<Account>> {
        let mut entries = self.entries.lock().await;
        let (kept, removed) = partition(std::mem::take(&mut *entries), clear_matcher(base_url));
        *entries = kept;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::fixtures::account;

    #[tokio::test]
    async fn set_twice_keeps_one_entry() {
        let store = MemoryStore::default();
        let acct = account("a", "https://x", 60_000, None);

        store.set(acct.clone()).await.unwrap();
        store.set(acct.clone()).await.unwrap();

        let list = store.list().await.unwrap();
        assert_eq!(list, vec![acct]);
    }

    #[tokio::test]
    async fn delete_removes_by_name() {
        let store = MemoryStore::default();
        store.set(account("a", "https://x", 60_000, None)).await.unwrap();
        store.set(account("b", "https://x", 60_000, None)).await.unwrap();

        let removed = store.delete(&["a".to_string()], None).await.unwrap();
        assert_eq!(removed.len(), 1);

        let names: Vec<_> = store.list().await.unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, ["b"]);
    }

    #[tokio::test]
    async fn clear_scoped_by_base_url() {
        let store = MemoryStore::default();
        store.set(account("a", "https://x", 60_000, None)).await.unwrap();
        store.set(account("b", "https://y", 60_000, None)).await.unwrap();

        let removed = store.clear(Some("https://x")).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(store.list().await.unwrap().len(), 1);

        store.clear(None).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_never_returns_dead_entries() {
        let store = MemoryStore::default();
        store.set(account("dead", "https://x", -1, Some(-1))).await.unwrap();

        let found = store.get(&AccountQuery::by_name("dead")).await.unwrap();
        assert!(found.is_none());
        assert!(store.list().await.unwrap().is_empty());
    }
}
