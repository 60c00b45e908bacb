//! Integration tests for the amplify-token-store crate.
//!
//! These exercise the backends through the public `TokenStore` trait object,
//! the way the auth engine consumes them.

use std::sync::Arc;
use std::time::Duration;

use amplify_token_store::{
    Account, AccountAuth, AccountQuery, AccountUser, Expiry, FileStore, MemoryKeychain, MemoryStore,
    SecureStore, StoreOptions, TokenStore, Tokens, now_ms,
};

fn account(name: &str, base_url: &str, access_in_ms: i64, refresh_in_ms: Option<i64>) -> Account {
    let now = now_ms();
    Account {
        auth: AccountAuth {
            authenticator: "OwnerPassword".into(),
            base_url: base_url.into(),
            client_id: "amplify-cli".into(),
            realm: "Broker".into(),
            env: Some("prod".into()),
            expires: Expiry {
                access: now + access_in_ms,
                refresh: refresh_in_ms.map(|r| now + r),
            },
            tokens: Tokens {
                access_token: format!("at-{name}"),
                refresh_token: refresh_in_ms.map(|_| format!("rt-{name}")),
                id_token: Some(format!("id-{name}")),
            },
            expired: access_in_ms <= 0,
        },
        hash: format!("amplify-cli:{name}-hash"),
        name: name.into(),
        user: AccountUser {
            email: Some("foo@bar.com".into()),
            first_name: Some("Foo".into()),
            ..AccountUser::default()
        },
        org: None,
        orgs: Vec::new(),
        sid: None,
    }
}

fn backends(dir: &std::path::Path, keychain: &MemoryKeychain) -> Vec<Arc<dyn TokenStore>> {
    vec![
        Arc::new(MemoryStore::default()),
        Arc::new(FileStore::new(Some(&dir.join("file")), StoreOptions::default()).unwrap()),
        Arc::new(
            SecureStore::with_keychain(Some(&dir.join("secure")), keychain, StoreOptions::default())
                .unwrap(),
        ),
    ]
}

// ═══════════════════════════════════════════════════════════════════════
//  Shared contract
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn idempotent_upsert_on_every_backend() {
    let dir = tempfile::tempdir().unwrap();
    let keychain = MemoryKeychain::new();

    for store in backends(dir.path(), &keychain) {
        let acct = account("amplify-cli:foo@bar.com", "https://login.axway.com", 60_000, None);
        store.set(acct.clone()).await.unwrap();
        store.set(acct.clone()).await.unwrap();

        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 1, "backend {}", store.kind());
        assert_eq!(list[0], acct, "backend {}", store.kind());
    }
}

#[tokio::test]
async fn delete_then_list_excludes_entry() {
    let dir = tempfile::tempdir().unwrap();
    let keychain = MemoryKeychain::new();

    for store in backends(dir.path(), &keychain) {
        store.set(account("a", "https://login.axway.com", 60_000, None)).await.unwrap();
        store.set(account("b", "https://login.axway.com", 60_000, None)).await.unwrap();

        let removed = store.delete(&["a".to_string()], None).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].name, "a");

        let names: Vec<_> = store.list().await.unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, ["b"], "backend {}", store.kind());
    }
}

#[tokio::test]
async fn delete_by_hash() {
    let store = MemoryStore::default();
    let acct = account("a", "https://login.axway.com", 60_000, None);
    store.set(acct.clone()).await.unwrap();

    let removed = store.delete(&[acct.hash.clone()], None).await.unwrap();
    assert_eq!(removed.len(), 1);
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn clear_scoped_and_unscoped() {
    let dir = tempfile::tempdir().unwrap();
    let keychain = MemoryKeychain::new();

    for store in backends(dir.path(), &keychain) {
        store.set(account("a", "https://login.axway.com", 60_000, None)).await.unwrap();
        store.set(account("a", "https://login-preprod.axway.com", 60_000, None)).await.unwrap();

        let removed = store.clear(Some("https://login-preprod.axway.com")).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(store.list().await.unwrap().len(), 1);

        store.clear(None).await.unwrap();
        assert!(store.list().await.unwrap().is_empty(), "backend {}", store.kind());
    }
}

#[tokio::test]
async fn get_respects_base_url() {
    let store = MemoryStore::default();
    store.set(account("a", "https://login.axway.com", 60_000, None)).await.unwrap();

    let query = AccountQuery::by_name("a").with_base_url("https://login.axway.com");
    assert!(store.get(&query).await.unwrap().is_some());

    let query = AccountQuery::by_name("a").with_base_url("https://elsewhere.example.com");
    assert!(store.get(&query).await.unwrap().is_none());
}

// ═══════════════════════════════════════════════════════════════════════
//  Purge
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn purge_retains_live_and_drops_dead() {
    let dir = tempfile::tempdir().unwrap();
    let keychain = MemoryKeychain::new();

    for store in backends(dir.path(), &keychain) {
        store.set(account("live", "https://login.axway.com", 60_000, None)).await.unwrap();
        store.set(account("dead", "https://login.axway.com", -5, Some(-5))).await.unwrap();

        let names: Vec<_> = store.list().await.unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, ["live"], "backend {}", store.kind());
    }
}

#[tokio::test]
async fn refresh_threshold_purges_soon_to_expire_refresh_tokens() {
    let options = StoreOptions {
        token_refresh_threshold: Duration::from_secs(300),
    };
    let store = MemoryStore::new(options);
    store
        .set(account("expiring", "https://login.axway.com", -5, Some(60_000)))
        .await
        .unwrap();

    assert!(store.list().await.unwrap().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
//  Persistence
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn file_store_roundtrip_deep_equality() {
    let dir = tempfile::tempdir().unwrap();
    let acct = account("amplify-cli:foo@bar.com", "https://login.axway.com", 60_000, Some(600_000));

    FileStore::new(Some(dir.path()), StoreOptions::default())
        .unwrap()
        .set(acct.clone())
        .await
        .unwrap();

    let reopened = FileStore::new(Some(dir.path()), StoreOptions::default()).unwrap();
    let list = reopened.list().await.unwrap();
    assert_eq!(list, vec![acct]);
}

#[tokio::test]
async fn file_and_secure_stores_do_not_share_files() {
    let dir = tempfile::tempdir().unwrap();
    let keychain = MemoryKeychain::new();

    let file = FileStore::new(Some(dir.path()), StoreOptions::default()).unwrap();
    let secure =
        SecureStore::with_keychain(Some(dir.path()), &keychain, StoreOptions::default()).unwrap();
    assert_ne!(file.path(), secure.path());

    file.set(account("a", "https://login.axway.com", 60_000, None)).await.unwrap();
    assert!(secure.list().await.unwrap().is_empty());
}
