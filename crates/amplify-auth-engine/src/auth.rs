//! High-level authentication orchestrator.
//!
//! [`Auth`] is the entry point for consuming code. It owns the token store
//! and the callback server, picks an authenticator from the shape of the
//! supplied credentials, and exposes `find`, `login`, `logout`, `list` and
//! `server_info`.
//!
//! Options are resolved per call: call options override the instance
//! options, which override the selected environment's defaults.

use std::sync::Arc;

use amplify_token_store::{
    Account, AccountQuery, FileStore, MemoryStore, SecureStore, StoreOptions, TokenStore, now_ms,
};
use serde_json::Value;

use crate::authenticator::{
    Authenticator, AuthenticatorConfig, AuthenticatorKind, LoginOptions, LoginOutcome,
    SigningKeySource,
};
use crate::callback::{CallbackServer, CallbackServerOptions};
use crate::config::{AuthOptions, ResolvedOptions, TokenStoreType};
use crate::error::{AuthEngineError, Result};

/// Store construction failures that make `auto` try the next backend.
const STORE_FALLTHROUGH_CODES: [&str; 2] = ["ESECRETSTOREUNAVAILABLE", "EMISSINGREQUIREDPARAMETER"];

/// Which accounts [`Auth::logout`] should end.
#[derive(Debug, Clone, Default)]
pub struct LogoutRequest {
    /// Names or hashes.
    pub accounts: Vec<String>,
    /// Every stored account, ignoring `accounts`.
    pub all: bool,
    pub base_url: Option<String>,
}

impl LogoutRequest {
    pub fn accounts<I, S>(accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accounts: accounts.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn all() -> Self {
        Self {
            all: true,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// Authentication orchestrator.
pub struct Auth {
    options: AuthOptions,
    token_store: Option<Arc<dyn TokenStore>>,
    server: CallbackServer,
    client: reqwest::Client,
}

impl Auth {
    /// Create an orchestrator from instance-level options.
    ///
    /// # Errors
    ///
    /// - Option resolution errors (bad base URL, zero timeout).
    /// - Token store errors for a pinned store type, or for `auto` when the
    ///   failure is not one it falls through on.
    pub fn new(options: AuthOptions) -> Result<Self> {
        let resolved = options.resolve()?;

        let token_store = match &options.token_store {
            Some(store) => Some(Arc::clone(store)),
            None => create_token_store(&resolved)?,
        };

        let server = CallbackServer::new(CallbackServerOptions {
            host: resolved.server_host.clone(),
            port: resolved.server_port,
            timeout: resolved.interactive_login_timeout,
        });
        let client = reqwest::Client::builder().build()?;

        tracing::info!(
            env = %resolved.env,
            base_url = %resolved.base_url,
            token_store = token_store.as_ref().map(|s| s.kind()).unwrap_or("none"),
            "auth initialized"
        );

        Ok(Self {
            options,
            token_store,
            server,
            client,
        })
    }

    pub fn options(&self) -> &AuthOptions {
        &self.options
    }

    pub fn token_store(&self) -> Option<&Arc<dyn TokenStore>> {
        self.token_store.as_ref()
    }

    pub fn callback_server(&self) -> &CallbackServer {
        &self.server
    }

    /// Build the authenticator `opts` describe.
    ///
    /// Precedence: an explicit authenticator, then username and password,
    /// then client secret, then signing key, then PKCE.
    pub fn create_authenticator(&self, opts: &AuthOptions) -> Result<Authenticator> {
        let merged = opts.clone().merge_over(&self.options);
        let resolved = merged.resolve()?;
        self.authenticator_from(&merged, &resolved)
    }

    fn authenticator_from(
        &self,
        merged: &AuthOptions,
        resolved: &ResolvedOptions,
    ) -> Result<Authenticator> {
        if let Some(authenticator) = &merged.authenticator {
            return Ok(authenticator.clone());
        }

        let client_id = resolved
            .client_id
            .clone()
            .ok_or_else(|| AuthEngineError::MissingRequiredParameter {
                name: "client_id".into(),
            })?;
        let config =
            self.authenticator_config(merged, resolved, client_id, resolved.base_url.clone());

        match (&merged.username, &merged.password) {
            (Some(username), Some(password)) => {
                return Authenticator::owner_password(config, username, password);
            }
            (Some(_), None) => {
                return Err(AuthEngineError::InvalidParameter {
                    name: "password".into(),
                    reason: "a password is required with a username".into(),
                });
            }
            _ => {}
        }

        if let Some(secret) = &merged.client_secret {
            return Authenticator::client_secret(
                config,
                secret,
                merged.service_account.unwrap_or(false),
            );
        }

        if let Some(path) = &merged.secret_file {
            return Authenticator::signed_jwt(config, SigningKeySource::File(path.clone()));
        }
        if let Some(pem) = &merged.secret {
            return Authenticator::signed_jwt(config, SigningKeySource::Pem(pem.clone()));
        }

        Authenticator::pkce(config)
    }

    fn authenticator_config(
        &self,
        merged: &AuthOptions,
        resolved: &ResolvedOptions,
        client_id: String,
        base_url: String,
    ) -> AuthenticatorConfig {
        AuthenticatorConfig {
            client_id,
            base_url,
            realm: resolved.realm.clone(),
            env: Some(resolved.env),
            platform_url: resolved.platform_url.clone(),
            endpoints: merged.endpoints.clone().unwrap_or_default(),
            scope: resolved.scope.clone(),
            response_type: resolved.response_type.clone(),
            access_type: resolved.access_type.clone(),
            token_store: self.token_store.clone(),
            http_client: Some(self.client.clone()),
            request_timeout: resolved.request_timeout,
        }
    }

    /// Rebuild the authenticator that produced `account`.
    ///
    /// Credentials come from `merged`. When they are not supplied, a PKCE
    /// authenticator for the same client stands in, which can still refresh
    /// and revoke.
    fn authenticator_for(&self, account: &Account, merged: &AuthOptions) -> Result<Authenticator> {
        if let Some(authenticator) = &merged.authenticator {
            return Ok(authenticator.clone());
        }

        let mut resolved = merged.resolve()?;
        resolved.realm = account.auth.realm.clone();
        if let Some(env) = account.auth.env.as_deref().and_then(|e| e.parse().ok()) {
            resolved.env = env;
        }
        let config = self.authenticator_config(
            merged,
            &resolved,
            account.auth.client_id.clone(),
            account.auth.base_url.clone(),
        );

        let kind = account.auth.authenticator.parse().unwrap_or(AuthenticatorKind::Pkce);
        let rebuilt = match kind {
            AuthenticatorKind::OwnerPassword => match (&merged.username, &merged.password) {
                (Some(username), Some(password)) => {
                    Some(Authenticator::owner_password(config.clone(), username, password)?)
                }
                _ => None,
            },
            AuthenticatorKind::ClientSecret => match &merged.client_secret {
                Some(secret) => Some(Authenticator::client_secret(
                    config.clone(),
                    secret,
                    merged.service_account.unwrap_or(false),
                )?),
                None => None,
            },
            AuthenticatorKind::SignedJwt => {
                let source = match (&merged.secret_file, &merged.secret) {
                    (Some(path), _) => Some(SigningKeySource::File(path.clone())),
                    (None, Some(pem)) => Some(SigningKeySource::Pem(pem.clone())),
                    (None, None) => None,
                };
                match source {
                    Some(source) => Some(Authenticator::signed_jwt(config.clone(), source)?),
                    None => None,
                }
            }
            AuthenticatorKind::Pkce => None,
        };

        match rebuilt {
            Some(authenticator) => Ok(authenticator),
            None => Authenticator::pkce(config),
        }
    }

    /// Load a stored account, refreshing it if its access token is expired
    /// or about to expire.
    ///
    /// Returns `Ok(None)` when there is no such account, and also when the
    /// server has permanently invalidated it (the account is then deleted).
    ///
    /// # Errors
    ///
    /// A refresh failure other than `invalid_grant` is returned only when
    /// the stored access token is no longer usable.
    pub async fn find(
        &self,
        account_name_or_hash: &str,
        opts: &AuthOptions,
    ) -> Result<Option<Account>> {
        let Some(store) = &self.token_store else {
            return Ok(None);
        };
        let merged = opts.clone().merge_over(&self.options);
        let resolved = merged.resolve()?;

        let mut query = AccountQuery {
            account_name: Some(account_name_or_hash.to_string()),
            hash: Some(account_name_or_hash.to_string()),
            base_url: None,
        };
        if merged.base_url.is_some() {
            query.base_url = Some(resolved.base_url.clone());
        }

        let Some(account) = store.get(&query).await? else {
            tracing::debug!(account = %account_name_or_hash, "account not found");
            return Ok(None);
        };

        let authenticator = self.authenticator_for(&account, &merged)?;
        let threshold_ms =
            i64::try_from(resolved.token_refresh_threshold.as_millis()).unwrap_or(i64::MAX);
        let now = now_ms();

        let needs_refresh = account.auth.expires.access <= now.saturating_add(threshold_ms);
        // Interactive grants can only refresh with a refresh token; without
        // one a still-valid access token is used until it expires.
        let can_refresh = !authenticator.interactive() || account.is_refreshable_at(now, 0);

        let account = if needs_refresh && !can_refresh && !account.is_access_expired_at(now) {
            tracing::debug!(
                account = %account.name,
                "access token expiring, nothing to refresh with"
            );
            account
        } else if needs_refresh {
            match authenticator.refresh(&account).await {
                Ok(refreshed) => {
                    tracing::info!(account = %refreshed.name, "account refreshed");
                    refreshed
                }
                Err(AuthEngineError::InvalidGrant { reason }) => {
                    tracing::warn!(
                        account = %account.name,
                        reason = %reason,
                        "refresh token rejected, removing account"
                    );
                    self.evict(store.as_ref(), &account).await?;
                    return Ok(None);
                }
                Err(e) if !account.is_access_expired_at(now) => {
                    tracing::warn!(
                        account = %account.name,
                        error = %e,
                        "refresh failed, using current token"
                    );
                    account
                }
                Err(e) => return Err(e),
            }
        } else {
            account
        };

        match authenticator.get_info(account.clone()).await {
            Ok(account) => Ok(Some(account)),
            Err(AuthEngineError::Unauthorized) => {
                tracing::warn!(account = %account.name, "access token rejected, removing account");
                self.evict(store.as_ref(), &account).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn evict(&self, store: &dyn TokenStore, account: &Account) -> Result<()> {
        store
            .delete(&[account.name.clone()], Some(&account.auth.base_url))
            .await?;
        Ok(())
    }

    /// Authenticate with the authenticator `opts` select.
    ///
    /// Interactive logins in manual mode return [`LoginOutcome::Pending`].
    pub async fn login(&self, opts: AuthOptions) -> Result<LoginOutcome> {
        let merged = opts.merge_over(&self.options);
        let resolved = merged.resolve()?;
        let authenticator = self.authenticator_from(&merged, &resolved)?;

        tracing::info!(
            authenticator = %authenticator.kind(),
            base_url = %authenticator.base_url(),
            "starting login"
        );

        authenticator
            .login(LoginOptions {
                manual: resolved.manual,
                timeout: Some(resolved.interactive_login_timeout),
                server: Some(self.server.clone()),
            })
            .await
    }

    /// Remove accounts locally, then revoke them remotely.
    ///
    /// Local removal always happens first and is never undone; remote
    /// revocation failures are only logged. Returns the removed accounts,
    /// marked expired.
    ///
    /// # Errors
    ///
    /// Returns [`AuthEngineError::InvalidArgument`] if neither accounts nor
    /// `all` are given.
    pub async fn logout(&self, request: LogoutRequest) -> Result<Vec<Account>> {
        if !request.all && request.accounts.is_empty() {
            return Err(AuthEngineError::invalid_argument(
                "accounts must name at least one account unless all is set",
            ));
        }
        let Some(store) = &self.token_store else {
            return Ok(Vec::new());
        };

        let base_url = request.base_url.as_deref();
        let mut removed = if request.all {
            store.clear(base_url).await?
        } else {
            store.delete(&request.accounts, base_url).await?
        };
        for account in &mut removed {
            account.auth.expired = true;
        }
        tracing::info!(count = removed.len(), "accounts logged out locally");

        for account in &removed {
            let revoked = match self.authenticator_for(account, &self.options) {
                Ok(authenticator) => authenticator.revoke(account).await,
                Err(e) => Err(e),
            };
            if let Err(e) = revoked {
                tracing::warn!(account = %account.name, error = %e, "remote logout failed");
            }
        }

        Ok(removed)
    }

    /// Stored live accounts, restricted to the configured environment when
    /// one is set.
    pub async fn list(&self) -> Result<Vec<Account>> {
        let Some(store) = &self.token_store else {
            return Ok(Vec::new());
        };

        let accounts = store.list().await?;
        Ok(match self.options.env {
            Some(env) => accounts
                .into_iter()
                .filter(|a| a.auth.env.as_deref().is_none_or(|e| e == env.name()))
                .collect(),
            None => accounts,
        })
    }

    /// The OpenID configuration of the realm `opts` resolve to.
    pub async fn server_info(&self, opts: &AuthOptions) -> Result<Value> {
        let merged = opts.clone().merge_over(&self.options);
        let resolved = merged.resolve()?;
        let config = self.authenticator_config(
            &merged,
            &resolved,
            resolved.client_id.clone().unwrap_or_else(|| "server-info".into()),
            resolved.base_url.clone(),
        );
        Authenticator::pkce(config)?.server_info().await
    }

    /// Reject any pending interactive login and close the listener.
    pub fn shutdown(&self) {
        self.server.stop();
    }
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth")
            .field("options", &self.options)
            .field("token_store", &self.token_store.as_ref().map(|s| s.kind()))
            .field("server", &self.server)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Token store selection
// ---------------------------------------------------------------------------

fn create_token_store(resolved: &ResolvedOptions) -> Result<Option<Arc<dyn TokenStore>>> {
    let options = StoreOptions {
        token_refresh_threshold: resolved.token_refresh_threshold,
    };
    let dir = resolved.token_store_dir.as_deref();

    let store: Arc<dyn TokenStore> = match resolved.token_store_type {
        TokenStoreType::None => return Ok(None),
        TokenStoreType::Memory => Arc::new(MemoryStore::new(options)),
        TokenStoreType::File => Arc::new(FileStore::new(dir, options)?),
        TokenStoreType::Secure => {
            Arc::new(SecureStore::new(dir, &resolved.secure_service_name, options)?)
        }
        TokenStoreType::Auto => {
            match SecureStore::new(dir, &resolved.secure_service_name, options) {
                Ok(store) => Arc::new(store),
                Err(e) if STORE_FALLTHROUGH_CODES.contains(&e.code()) => {
                    tracing::debug!(
                        error = %e,
                        "secure token store unavailable, trying file store"
                    );
                    match FileStore::new(dir, options) {
                        Ok(store) => Arc::new(store),
                        Err(e) if STORE_FALLTHROUGH_CODES.contains(&e.code()) => {
                            tracing::debug!(
                                error = %e,
                                "file token store unavailable, using memory store"
                            );
                            Arc::new(MemoryStore::new(options))
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    };
    Ok(Some(store))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;

    fn options() -> AuthOptions {
        AuthOptions {
            client_id: Some("test-client".into()),
            base_url: Some("http://127.0.0.1:1".into()),
            token_store_type: Some(TokenStoreType::Memory),
            ..AuthOptions::default()
        }
    }

    #[test]
    fn auto_store_falls_through_to_memory_without_dir() {
        let auth = Auth::new(AuthOptions {
            token_store_type: None,
            ..options()
        })
        .unwrap();
        assert_eq!(auth.token_store().map(|s| s.kind()), Some("memory"));
    }

    #[test]
    fn pinned_store_raises() {
        let err = Auth::new(AuthOptions {
            token_store_type: Some(TokenStoreType::File),
            ..options()
        })
        .unwrap_err();
        assert_eq!(err.code(), "EMISSINGREQUIREDPARAMETER");
    }

    #[test]
    fn file_store_with_dir() {
        let dir = tempfile::tempdir().unwrap();
        let auth = Auth::new(AuthOptions {
            token_store_type: Some(TokenStoreType::File),
            token_store_dir: Some(dir.path().to_path_buf()),
            ..options()
        })
        .unwrap();
        assert_eq!(auth.token_store().map(|s| s.kind()), Some("file"));
    }

    #[test]
    fn none_disables_persistence() {
        let auth = Auth::new(AuthOptions {
            token_store_type: Some(TokenStoreType::None),
            ..options()
        })
        .unwrap();
        assert!(auth.token_store().is_none());
    }

    #[test]
    fn explicit_store_wins() {
        let store: Arc<dyn TokenStore> = Arc::new(MemoryStore::default());
        let auth = Auth::new(AuthOptions {
            token_store_type: Some(TokenStoreType::File),
            token_store: Some(Arc::clone(&store)),
            ..options()
        })
        .unwrap();
        assert!(Arc::ptr_eq(auth.token_store().unwrap(), &store));
    }

    #[test]
    fn authenticator_precedence() {
        let auth = Auth::new(options()).unwrap();

        let pkce = auth.create_authenticator(&AuthOptions::default()).unwrap();
        assert_eq!(pkce.kind(), AuthenticatorKind::Pkce);

        let all = AuthOptions {
            username: Some("foo".into()),
            password: Some("bar".into()),
            client_secret: Some("shh".into()),
            secret: Some("not even pem".into()),
            ..AuthOptions::default()
        };
        assert_eq!(
            auth.create_authenticator(&all).unwrap().kind(),
            AuthenticatorKind::OwnerPassword
        );

        let secret_and_key = AuthOptions {
            client_secret: Some("shh".into()),
            secret: Some("not even pem".into()),
            ..AuthOptions::default()
        };
        assert_eq!(
            auth.create_authenticator(&secret_and_key).unwrap().kind(),
            AuthenticatorKind::ClientSecret
        );

        let bad_key = AuthOptions {
            secret: Some("not even pem".into()),
            ..AuthOptions::default()
        };
        assert_eq!(
            auth.create_authenticator(&bad_key).unwrap_err().code(),
            "EINVALIDSIGNINGKEY"
        );

        let explicit =
            Authenticator::client_secret(AuthenticatorConfig::new("other", "https://x"), "s", true)
                .unwrap();
        let opts = AuthOptions {
            authenticator: Some(explicit.clone()),
            username: Some("foo".into()),
            password: Some("bar".into()),
            ..AuthOptions::default()
        };
        assert_eq!(auth.create_authenticator(&opts).unwrap().hash(), explicit.hash());
    }

    #[test]
    fn username_without_password_is_rejected() {
        let auth = Auth::new(options()).unwrap();
        let err = auth
            .create_authenticator(&AuthOptions {
                username: Some("foo".into()),
                ..AuthOptions::default()
            })
            .unwrap_err();
        assert_eq!(err.code(), "EINVALIDPARAMETER");
    }

    #[test]
    fn client_id_is_required() {
        let auth = Auth::new(AuthOptions {
            client_id: None,
            ..options()
        })
        .unwrap();
        let err = auth.create_authenticator(&AuthOptions::default()).unwrap_err();
        assert_eq!(err.code(), "EMISSINGREQUIREDPARAMETER");
    }

    #[tokio::test]
    async fn logout_requires_targets() {
        let auth = Auth::new(options()).unwrap();
        let err = auth.logout(LogoutRequest::default()).await.unwrap_err();
        assert_eq!(err.code(), "EINVALIDARGUMENT");
    }

    #[tokio::test]
    async fn list_filters_by_environment() {
        let store: Arc<dyn TokenStore> = Arc::new(MemoryStore::default());
        let auth = Auth::new(AuthOptions {
            env: Some(Environment::Staging),
            token_store: Some(Arc::clone(&store)),
            ..options()
        })
        .unwrap();

        let mut staging = test_account("staging-account");
        staging.auth.env = Some("staging".into());
        let mut prod = test_account("prod-account");
        prod.auth.env = Some("prod".into());
        store.set(staging).await.unwrap();
        store.set(prod).await.unwrap();

        let names: Vec<_> = auth.list().await.unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, ["staging-account"]);
    }

    #[tokio::test]
    async fn find_without_store_is_none() {
        let auth = Auth::new(AuthOptions {
            token_store_type: Some(TokenStoreType::None),
            ..options()
        })
        .unwrap();
        assert!(auth.find("anything", &AuthOptions::default()).await.unwrap().is_none());
    }

    fn test_account(name: &str) -> Account {
        use amplify_token_store::{AccountAuth, AccountUser, Expiry, Tokens};
        Account {
            auth: AccountAuth {
                authenticator: "PKCE".into(),
                base_url: "http://127.0.0.1:1".into(),
                client_id: "test-client".into(),
                realm: "Broker".into(),
                env: None,
                expires: Expiry {
                    access: now_ms() + 60_000,
                    refresh: None,
                },
                tokens: Tokens {
                    access_token: "at".into(),
                    refresh_token: None,
                    id_token: None,
                },
                expired: false,
            },
            hash: format!("test-client:{name}"),
            name: name.into(),
            user: AccountUser::default(),
            org: None,
            orgs: Vec::new(),
            sid: None,
        }
    }
}
