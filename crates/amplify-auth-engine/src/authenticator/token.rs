//! Token endpoint exchange, userinfo enrichment and revocation.

use amplify_token_store::{Account, AccountAuth, AccountOrg, Expiry, Tokens, now_ms};
use serde::Deserialize;
use serde_json::Value;

use super::{Authenticator, GrantContext};
use crate::error::{AuthEngineError, Result};
use crate::jwt::{TokenIdentity, decode_payload};

/// Inputs for [`Authenticator::get_token`].
#[derive(Debug, Clone, Default)]
pub struct TokenRequest {
    /// Authorization code from the redirect.
    pub code: Option<String>,
    /// The `redirect_uri` the code was issued for.
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    /// Existing session. Its refresh token is used when no code is given,
    /// and its profile carries over to the result.
    pub account: Option<Account>,
}

/// Successful token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_in: Option<i64>,
    refresh_expires_in: Option<i64>,
}

/// OAuth error response.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

impl Authenticator {
    /// Exchange a code or credentials for tokens and build the session.
    ///
    /// With no code and a refreshable `request.account`, a `refresh_token`
    /// grant is used. Otherwise the strategy's primary grant is used. The
    /// resulting account is written to the token store, if one is configured.
    ///
    /// # Errors
    ///
    /// - [`AuthEngineError::InvalidGrant`] if the server answers
    ///   `invalid_grant`. The session must be discarded.
    /// - [`AuthEngineError::AuthFailed`] for any other rejection.
    /// - [`AuthEngineError::Network`] on transport failure.
    pub async fn get_token(&self, request: TokenRequest) -> Result<Account> {
        let inner = &self.inner;
        let now = now_ms();

        let ctx = GrantContext {
            client_id: &inner.client_id,
            token_endpoint: &inner.endpoints.token,
            code: request.code.as_deref(),
            redirect_uri: request.redirect_uri.as_deref(),
            code_verifier: request.code_verifier.as_deref(),
        };

        let refresh_token = match (&request.code, &request.account) {
            (None, Some(account)) if account.is_refreshable_at(now, 0) => {
                account.auth.tokens.refresh_token.clone()
            }
            _ => None,
        };

        let mut params = match &refresh_token {
            Some(refresh_token) => {
                tracing::debug!(hash = %inner.hash, "requesting refresh_token grant");
                let mut params = vec![
                    ("grant_type", "refresh_token".to_string()),
                    ("refresh_token", refresh_token.clone()),
                ];
                params.extend(inner.strategy.refresh_token_params(&ctx)?);
                params
            }
            None => {
                let params = inner.strategy.token_params(&ctx)?;
                tracing::debug!(
                    hash = %inner.hash,
                    authenticator = %inner.strategy.kind(),
                    "requesting primary grant"
                );
                params
            }
        };
        params.push(("client_id", inner.client_id.clone()));

        let mut builder = inner.client.post(&inner.endpoints.token).form(&params);
        if let Some(timeout) = inner.request_timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder.send().await?;
        let tokens = parse_token_response(response).await?;

        let account = self.build_account(tokens, request.account, now);
        tracing::info!(account = %account.name, hash = %account.hash, "token exchange succeeded");

        if let Some(store) = &inner.token_store {
            store.set(account.clone()).await?;
        }
        Ok(account)
    }

    /// Refresh `account` with its refresh token, or by re-running a
    /// non-interactive primary grant when it has none.
    ///
    /// # Errors
    ///
    /// Returns [`AuthEngineError::InvalidGrant`] if an interactive session
    /// has no usable refresh token left, in addition to the errors of
    /// [`Authenticator::get_token`].
    pub async fn refresh(&self, account: &Account) -> Result<Account> {
        if !account.is_refreshable_at(now_ms(), 0) && self.interactive() {
            return Err(AuthEngineError::InvalidGrant {
                reason: "refresh token expired".into(),
            });
        }

        tracing::debug!(account = %account.name, "refreshing account");
        self.get_token(TokenRequest {
            account: Some(account.clone()),
            ..TokenRequest::default()
        })
        .await
    }

    fn build_account(&self, tokens: TokenResponse, prior: Option<Account>, now: i64) -> Account {
        let inner = &self.inner;

        let claims = tokens
            .id_token
            .as_deref()
            .or(Some(tokens.access_token.as_str()))
            .map(decode_payload)
            .transpose();
        let identity = match claims {
            Ok(Some(claims)) => TokenIdentity::from_claims(&claims),
            Ok(None) => TokenIdentity::default(),
            Err(e) => {
                tracing::warn!(error = %e, "could not decode token payload");
                TokenIdentity::default()
            }
        };

        let expires = Expiry {
            access: expires_at(now, tokens.expires_in.unwrap_or(0)),
            refresh: tokens
                .refresh_token
                .as_ref()
                .and(tokens.refresh_expires_in)
                .filter(|secs| *secs > 0)
                .map(|secs| expires_at(now, secs)),
        };

        // A refresh grant may omit the refresh token; keep the one we had.
        let (refresh_token, expires) = match (&tokens.refresh_token, &prior) {
            (None, Some(prior)) => (prior.auth.tokens.refresh_token.clone(), Expiry {
                refresh: prior.auth.expires.refresh,
                ..expires
            }),
            _ => (tokens.refresh_token.clone(), expires),
        };

        let auth = AccountAuth {
            authenticator: prior
                .as_ref()
                .map(|p| p.auth.authenticator.clone())
                .unwrap_or_else(|| inner.strategy.kind().name().to_string()),
            base_url: inner.base_url.clone(),
            client_id: inner.client_id.clone(),
            realm: inner.realm.clone(),
            env: inner
                .env
                .map(|e| e.name().to_string())
                .or_else(|| prior.as_ref().and_then(|p| p.auth.env.clone())),
            expires,
            tokens: Tokens {
                access_token: tokens.access_token,
                refresh_token,
                id_token: tokens.id_token,
            },
            expired: expires.access <= now,
        };

        let mut account = match prior {
            Some(mut prior) => {
                prior.auth = auth;
                prior
            }
            None => Account {
                auth,
                hash: inner.hash.clone(),
                name: inner.hash.clone(),
                user: Default::default(),
                org: None,
                orgs: Vec::new(),
                sid: None,
            },
        };

        if let Some(email) = identity.email {
            account.name = format!("{}:{email}", inner.client_id);
            account.user.email = Some(email);
        }
        if let Some(org_id) = identity.org_id {
            let same_org = account
                .org
                .as_ref()
                .is_some_and(|org| org.id.as_deref() == Some(org_id.as_str()));
            if !same_org {
                account.org = Some(AccountOrg {
                    id: Some(org_id),
                    ..AccountOrg::default()
                });
            }
        }
        if identity.sid.is_some() {
            account.sid = identity.sid;
        }

        account
    }

    /// Fill the user profile from the userinfo endpoint.
    ///
    /// Only a `401` is reported, as [`AuthEngineError::Unauthorized`]. Any
    /// other failure is logged and the account is returned unchanged.
    pub async fn get_info(&self, mut account: Account) -> Result<Account> {
        let inner = &self.inner;

        let mut builder = inner
            .client
            .get(&inner.endpoints.userinfo)
            .bearer_auth(&account.auth.tokens.access_token);
        if let Some(timeout) = inner.request_timeout {
            builder = builder.timeout(timeout);
        }

        let info: Value = match builder.send().await {
            Ok(response) if response.status() == reqwest::StatusCode::UNAUTHORIZED => {
                return Err(AuthEngineError::Unauthorized);
            }
            Ok(response) if response.status().is_success() => match response.json().await {
                Ok(info) => info,
                Err(e) => {
                    tracing::warn!(
                        account = %account.name,
                        error = %e,
                        "userinfo response unreadable"
                    );
                    return Ok(account);
                }
            },
            Ok(response) => {
                tracing::warn!(
                    account = %account.name,
                    status = %response.status(),
                    "userinfo request failed"
                );
                return Ok(account);
            }
            Err(e) => {
                tracing::warn!(account = %account.name, error = %e, "userinfo request failed");
                return Ok(account);
            }
        };

        let field = |name: &str| {
            info.get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };

        let user = &mut account.user;
        user.first_name = field("given_name").or(user.first_name.take());
        user.last_name = field("family_name").or(user.last_name.take());
        user.guid = field("user_guid").or(user.guid.take());
        user.axway_id = field("axway_id").or(user.axway_id.take());
        user.organization = field("org_name").or(user.organization.take());
        if let Some(email) = field("email") {
            account.name = format!("{}:{email}", inner.client_id);
            account.user.email = Some(email);
        }

        if let Some(guid) = field("org_guid") {
            let org = account.org.get_or_insert_with(AccountOrg::default);
            org.guid = Some(guid);
            org.name = field("org_name").or(org.name.take());
            if !account.orgs.iter().any(|o| o.guid == org.guid) {
                let org = org.clone();
                account.orgs.push(org);
            }
        }

        tracing::debug!(account = %account.name, "account enriched from userinfo");
        if let Some(store) = &inner.token_store {
            store.set(account.clone()).await?;
        }
        Ok(account)
    }

    /// [`Authenticator::get_info`] where even a `401` is only logged.
    pub(crate) async fn enrich(&self, account: Account) -> Account {
        let fallback = account.clone();
        match self.get_info(account).await {
            Ok(account) => account,
            Err(e) => {
                tracing::warn!(account = %fallback.name, error = %e, "userinfo enrichment failed");
                fallback
            }
        }
    }

    /// End the session at the authorization server.
    ///
    /// Uses `id_token_hint` when an id token is known; otherwise posts the
    /// refresh token to the logout endpoint.
    pub async fn revoke(&self, account: &Account) -> Result<()> {
        let inner = &self.inner;
        let tokens = &account.auth.tokens;

        let mut builder = match (&tokens.id_token, &tokens.refresh_token) {
            (Some(id_token), _) => inner
                .client
                .get(&inner.endpoints.logout)
                .query(&[("id_token_hint", id_token.as_str())]),
            (None, Some(refresh_token)) => inner.client.post(&inner.endpoints.logout).form(&[
                ("client_id", inner.client_id.as_str()),
                ("refresh_token", refresh_token.as_str()),
            ]),
            (None, None) => {
                tracing::debug!(account = %account.name, "nothing to revoke");
                return Ok(());
            }
        };
        if let Some(timeout) = inner.request_timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(AuthEngineError::auth_failed(format!(
                "logout endpoint returned HTTP {}",
                response.status()
            )));
        }

        tracing::info!(account = %account.name, "session revoked");
        Ok(())
    }

    /// Fetch the realm's OpenID configuration document.
    pub async fn server_info(&self) -> Result<Value> {
        let inner = &self.inner;
        let mut builder = inner.client.get(&inner.endpoints.well_known);
        if let Some(timeout) = inner.request_timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthEngineError::auth_failed(format!(
                "discovery endpoint returned HTTP {status}"
            )));
        }
        Ok(response.json().await?)
    }
}

/// Epoch ms `secs` seconds after `now`. Server-supplied lifetimes saturate.
fn expires_at(now: i64, secs: i64) -> i64 {
    now.saturating_add(secs.saturating_mul(1000))
}

/// Parse the HTTP response from the token endpoint.
async fn parse_token_response(response: reqwest::Response) -> Result<TokenResponse> {
    let status = response.status();

    if status.is_success() {
        let body = response.text().await?;
        return serde_json::from_str(&body)
            .map_err(|e| AuthEngineError::auth_failed(format!("malformed token response: {e}")));
    }

    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<TokenErrorResponse>(&body) {
        Ok(error) if error.error == "invalid_grant" => Err(AuthEngineError::InvalidGrant {
            reason: error.error_description.unwrap_or(error.error),
        }),
        Ok(error) => Err(AuthEngineError::auth_failed(match error.error_description {
            Some(description) => format!("{}: {description}", error.error),
            None => error.error,
        })),
        Err(_) => Err(AuthEngineError::auth_failed(format!("HTTP {status}: {body}"))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticator::tests::config;
    use crate::jwt::tests::unsigned_token;

    fn response(json: Value) -> TokenResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn builds_named_account_from_id_token() {
        let auth = Authenticator::owner_password(config(), "foo", "bar").unwrap();
        let id_token = unsigned_token(&serde_json::json!({
            "email": "foo@bar.com",
            "orgId": 7,
            "sid": "s1",
        }));
        let now = 1_000_000;

        let account = auth.build_account(
            response(serde_json::json!({
                "access_token": "at",
                "refresh_token": "rt",
                "id_token": id_token,
                "expires_in": 10,
                "refresh_expires_in": 20
            })),
            None,
            now,
        );

        assert_eq!(account.name, "test client:foo@bar.com");
        assert_eq!(account.hash, auth.hash());
        assert_eq!(account.auth.authenticator, "OwnerPassword");
        assert_eq!(account.auth.expires.access, now + 10_000);
        assert_eq!(account.auth.expires.refresh, Some(now + 20_000));
        assert_eq!(account.org.as_ref().and_then(|o| o.id.as_deref()), Some("7"));
        assert_eq!(account.sid.as_deref(), Some("s1"));
        assert!(!account.auth.expired);
    }

    #[test]
    fn opaque_token_falls_back_to_hash_name() {
        let auth = Authenticator::client_secret(config(), "shh", true).unwrap();
        let account = auth.build_account(
            response(serde_json::json!({ "access_token": "opaque", "expires_in": 60 })),
            None,
            0,
        );
        assert_eq!(account.name, auth.hash());
        assert!(account.auth.expires.refresh.is_none());
    }

    #[test]
    fn refresh_keeps_prior_identity_and_refresh_token() {
        let auth = Authenticator::pkce(config()).unwrap();
        let first = auth.build_account(
            response(serde_json::json!({
                "access_token": unsigned_token(&serde_json::json!({ "email": "a@b.c" })),
                "refresh_token": "rt-1",
                "expires_in": 10,
                "refresh_expires_in": 100
            })),
            None,
            0,
        );

        let second = auth.build_account(
            response(serde_json::json!({ "access_token": "opaque-2", "expires_in": 10 })),
            Some(first.clone()),
            5_000,
        );
        assert_eq!(second.name, first.name);
        assert_eq!(second.auth.tokens.access_token, "opaque-2");
        assert_eq!(second.auth.tokens.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(second.auth.expires.refresh, Some(100_000));
        assert_eq!(second.auth.expires.access, 15_000);
    }

    #[test]
    fn huge_lifetimes_saturate() {
        let auth = Authenticator::owner_password(config(), "foo", "bar").unwrap();
        let account = auth.build_account(
            response(serde_json::json!({
                "access_token": "opaque",
                "refresh_token": "rt",
                "expires_in": 10_000_000_000_000_000_i64,
                "refresh_expires_in": i64::MAX
            })),
            None,
            1_000,
        );
        assert_eq!(account.auth.expires.access, i64::MAX);
        assert_eq!(account.auth.expires.refresh, Some(i64::MAX));
        assert!(!account.auth.expired);
    }
}
