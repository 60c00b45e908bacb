//! The persisted session record.
//!
//! An [`Account`] is what a successful token exchange produces and what every
//! token store persists. Expiry timestamps are absolute epoch milliseconds.

use serde::{Deserialize, Serialize};

/// Current time as epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Token material and the parameters needed to refresh it.
    pub auth: AccountAuth,

    /// Credential identity, see the authenticator's `hash`.
    pub hash: String,

    /// Display name, `{client_id}:{email}` once the email is known.
    pub name: String,

    /// Best-effort user profile.
    #[serde(default)]
    pub user: AccountUser,

    /// The organization this session is bound to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<AccountOrg>,

    /// All organizations known for this session.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub orgs: Vec<AccountOrg>,

    /// Server-side session id from the token payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
}

/// The `auth` section of an [`Account`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountAuth {
    /// Name of the authenticator variant that produced the tokens.
    pub authenticator: String,
    pub base_url: String,
    pub client_id: String,
    pub realm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    pub expires: Expiry,
    pub tokens: Tokens,
    /// Derived from `expires.access`; refreshed whenever a store reads it.
    #[serde(default)]
    pub expired: bool,
}

/// Absolute expiry timestamps in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expiry {
    pub access: i64,
    #[serde(default)]
    pub refresh: Option<i64>,
}

/// Raw tokens as returned by the token endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl std::fmt::Debug for Tokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokens")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// User profile, filled from the token payload and the userinfo endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axway_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

/// Organization reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOrg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Account {
    /// Whether the access token has expired as of `now` (epoch ms).
    pub fn is_access_expired_at(&self, now: i64) -> bool {
        self.auth.expires.access <= now
    }

    /// Whether the access token has expired right now.
    pub fn is_access_expired(&self) -> bool {
        self.is_access_expired_at(now_ms())
    }

    /// A refresh token exists and stays valid past `now + threshold_ms`.
    pub fn is_refreshable_at(&self, now: i64, threshold_ms: i64) -> bool {
        self.auth.tokens.refresh_token.is_some()
            && self
                .auth
                .expires
                .refresh
                .is_some_and(|refresh| refresh > now.saturating_add(threshold_ms))
    }

    /// Neither the access token nor the refresh token can be used any more.
    pub fn is_dead_at(&self, now: i64, threshold_ms: i64) -> bool {
        self.is_access_expired_at(now) && !self.is_refreshable_at(now, threshold_ms)
    }

    /// Recompute the derived `auth.expired` flag.
    pub fn update_expired(&mut self, now: i64) {
        self.auth.expired = self.is_access_expired_at(now);
    }

    /// Whether `name_or_hash` identifies this account.
    pub fn matches(&self, name_or_hash: &str) -> bool {
        self.name == name_or_hash || self.hash == name_or_hash
    }

    /// Whether this account belongs to `base_url` (trailing slashes ignored).
    pub fn is_for_base_url(&self, base_url: &str) -> bool {
        self.auth.base_url.trim_end_matches('/') == base_url.trim_end_matches('/')
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::account;
    use super::*;

    #[test]
    fn access_expiry() {
        let live = account("a", "https://login.example.com", 60_000, None);
        assert!(!live.is_access_expired());

        let stale = account("b", "https://login.example.com", -1, None);
        assert!(stale.is_access_expired());
    }

    #[test]
    fn refreshable_requires_token_and_future_expiry() {
        let now = now_ms();
        let acct = account("a", "https://x", -1, Some(60_000));
        assert!(acct.is_refreshable_at(now, 0));
        // Threshold pushes the lookahead past the refresh expiry.
        assert!(!acct.is_refreshable_at(now, 120_000));

        let mut no_token = acct.clone();
        no_token.auth.tokens.refresh_token = None;
        assert!(!no_token.is_refreshable_at(now, 0));
    }

    #[test]
    fn dead_when_both_expired() {
        let now = now_ms();
        assert!(account("a", "https://x", -10, Some(-10)).is_dead_at(now, 0));
        assert!(account("b", "https://x", -10, None).is_dead_at(now, 0));
        assert!(!account("c", "https://x", -10, Some(60_000)).is_dead_at(now, 0));
        assert!(!account("d", "https://x", 60_000, Some(-10)).is_dead_at(now, 0));
    }

    #[test]
    fn matches_name_or_hash() {
        let acct = account("cli:foo@bar.com", "https://x", 1000, None);
        assert!(acct.matches("cli:foo@bar.com"));
        assert!(acct.matches("test-client:cli:foo@bar.com"));
        assert!(!acct.matches("someone-else"));
    }

    #[test]
    fn base_url_comparison_ignores_trailing_slash() {
        let acct = account("a", "https://login.example.com/", 1000, None);
        assert!(acct.is_for_base_url("https://login.example.com"));
        assert!(!acct.is_for_base_url("https://login-preprod.example.com"));
    }

    #[test]
    fn serialized_shape_uses_camel_case_auth() {
        let acct = account("a", "https://x", 1000, Some(2000));
        let json = serde_json::to_value(&acct).unwrap();
        assert_eq!(json["auth"]["baseUrl"], "https://x");
        assert_eq!(json["auth"]["clientId"], "test-client");
        assert_eq!(json["auth"]["tokens"]["access_token"], "access-a");
        assert!(json["auth"]["expires"]["refresh"].is_i64());
        assert!(json.get("org").is_none());
    }

    #[test]
    fn debug_redacts_tokens() {
        let acct = account("a", "https://x", 1000, Some(2000));
        let debug = format!("{:?}", acct.auth.tokens);
        assert!(!debug.contains("access-a"));
        assert!(!debug.contains("refresh-a"));
    }
}
