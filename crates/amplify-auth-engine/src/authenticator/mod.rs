//! The authenticator: shared OAuth plumbing plus pluggable grant strategies.
//!
//! An [`Authenticator`] owns everything common to all grants (endpoint
//! resolution, the credential hash, the token exchange, userinfo enrichment,
//! revocation and the interactive login flow). What differs between grants
//! lives behind [`GrantStrategy`]:
//!
//! | Strategy | Primary grant | Interactive |
//! |---|---|---|
//! | [`Pkce`] | `authorization_code` + `code_verifier` | yes |
//! | [`OwnerPassword`] | `password` | no |
//! | [`ClientSecret`] | `client_credentials`, or interactive `authorization_code` | configurable |
//! | [`SignedJwt`] | `client_credentials` + RS256 client assertion | no |

mod client_secret;
mod endpoints;
mod login;
mod owner_password;
mod pkce;
mod signed_jwt;
mod token;

pub use client_secret::ClientSecret;
pub use endpoints::{EndpointOverrides, Endpoints};
pub use login::{LoginOptions, LoginOutcome, PendingLogin};
pub use owner_password::OwnerPassword;
pub use pkce::Pkce;
pub use signed_jwt::{SignedJwt, SigningKeySource};
pub use token::TokenRequest;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use amplify_token_store::TokenStore;
use md5::{Digest, Md5};
use serde_json::{Map, Value};

use crate::config::{
    DEFAULT_ACCESS_TYPE, DEFAULT_REALM, DEFAULT_RESPONSE_TYPE, DEFAULT_SCOPE, Environment,
};
use crate::error::{AuthEngineError, Result};

// ---------------------------------------------------------------------------
// Grant strategies
// ---------------------------------------------------------------------------

/// Name of a grant strategy, as recorded in `Account.auth.authenticator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthenticatorKind {
    Pkce,
    OwnerPassword,
    ClientSecret,
    SignedJwt,
}

impl AuthenticatorKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Pkce => "PKCE",
            Self::OwnerPassword => "OwnerPassword",
            Self::ClientSecret => "ClientSecret",
            Self::SignedJwt => "SignedJWT",
        }
    }
}

impl fmt::Display for AuthenticatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AuthenticatorKind {
    type Err = AuthEngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PKCE" => Ok(Self::Pkce),
            "OwnerPassword" => Ok(Self::OwnerPassword),
            "ClientSecret" => Ok(Self::ClientSecret),
            "SignedJWT" => Ok(Self::SignedJwt),
            other => Err(AuthEngineError::InvalidValue {
                name: "authenticator".into(),
                value: other.into(),
            }),
        }
    }
}

/// Inputs available to a strategy when it builds a token request.
#[derive(Debug, Clone, Copy)]
pub struct GrantContext<'a> {
    pub client_id: &'a str,
    pub token_endpoint: &'a str,
    pub code: Option<&'a str>,
    pub redirect_uri: Option<&'a str>,
    pub code_verifier: Option<&'a str>,
}

/// Form fields sent to the token endpoint.
pub type FormParams = Vec<(&'static str, String)>;

/// The grant-specific half of an [`Authenticator`].
pub trait GrantStrategy: Send + Sync {
    fn kind(&self) -> AuthenticatorKind;

    /// Whether login needs a browser round trip.
    fn interactive(&self) -> bool {
        false
    }

    /// Credential fields that distinguish sessions of the same client.
    fn hash_params(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Form fields for the primary grant.
    fn token_params(&self, ctx: &GrantContext<'_>) -> Result<FormParams>;

    /// Extra form fields for a `refresh_token` grant.
    fn refresh_token_params(&self, _ctx: &GrantContext<'_>) -> Result<FormParams> {
        Ok(Vec::new())
    }

    /// Extra query parameters for the authorization URL.
    fn authorization_url_params(&self, _code_verifier: &str) -> FormParams {
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Construction-time settings shared by every strategy.
#[derive(Clone)]
pub struct AuthenticatorConfig {
    pub client_id: String,
    pub base_url: String,
    pub realm: String,
    pub env: Option<Environment>,
    /// Platform UI for org selection after an interactive login.
    pub platform_url: Option<String>,
    pub endpoints: EndpointOverrides,
    pub scope: String,
    pub response_type: String,
    pub access_type: String,
    /// Accounts are written here after every successful exchange.
    pub token_store: Option<Arc<dyn TokenStore>>,
    pub http_client: Option<reqwest::Client>,
    pub request_timeout: Option<Duration>,
}

impl AuthenticatorConfig {
    pub fn new(client_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            base_url: base_url.into(),
            realm: DEFAULT_REALM.into(),
            env: None,
            platform_url: None,
            endpoints: EndpointOverrides::default(),
            scope: DEFAULT_SCOPE.into(),
            response_type: DEFAULT_RESPONSE_TYPE.into(),
            access_type: DEFAULT_ACCESS_TYPE.into(),
            token_store: None,
            http_client: None,
            request_timeout: None,
        }
    }
}

impl fmt::Debug for AuthenticatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatorConfig")
            .field("client_id", &self.client_id)
            .field("base_url", &self.base_url)
            .field("realm", &self.realm)
            .field("env", &self.env)
            .field("platform_url", &self.platform_url)
            .field("token_store", &self.token_store.as_ref().map(|s| s.kind()))
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Authenticator
// ---------------------------------------------------------------------------

pub(crate) struct Inner {
    pub(crate) strategy: Box<dyn GrantStrategy>,
    pub(crate) hash: String,
    pub(crate) client_id: String,
    pub(crate) base_url: String,
    pub(crate) realm: String,
    pub(crate) env: Option<Environment>,
    pub(crate) platform_url: Option<String>,
    pub(crate) endpoints: Endpoints,
    pub(crate) scope: String,
    pub(crate) response_type: String,
    pub(crate) access_type: String,
    pub(crate) token_store: Option<Arc<dyn TokenStore>>,
    pub(crate) client: reqwest::Client,
    pub(crate) request_timeout: Option<Duration>,
}

/// OAuth client for one credential.
///
/// Cloning is cheap; clones share configuration and HTTP client.
#[derive(Clone)]
pub struct Authenticator {
    pub(crate) inner: Arc<Inner>,
}

impl Authenticator {
    /// Interactive authorization code flow with PKCE.
    pub fn pkce(config: AuthenticatorConfig) -> Result<Self> {
        Self::with_strategy(config, Box::new(Pkce))
    }

    /// Resource owner password grant.
    pub fn owner_password(
        config: AuthenticatorConfig,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let strategy = OwnerPassword::new(username.into(), password.into())?;
        Self::with_strategy(config, Box::new(strategy))
    }

    /// Confidential client. A service account uses `client_credentials`;
    /// otherwise login goes through the browser.
    pub fn client_secret(
        config: AuthenticatorConfig,
        client_secret: impl Into<String>,
        service_account: bool,
    ) -> Result<Self> {
        let strategy = ClientSecret::new(client_secret.into(), service_account)?;
        Self::with_strategy(config, Box::new(strategy))
    }

    /// Client credentials with an RS256 signed client assertion.
    pub fn signed_jwt(config: AuthenticatorConfig, key: SigningKeySource) -> Result<Self> {
        let strategy = SignedJwt::new(key)?;
        Self::with_strategy(config, Box::new(strategy))
    }

    /// Build an authenticator around any [`GrantStrategy`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthEngineError::InvalidArgument`] if the client id, realm
    /// or base URL is empty, or the base URL does not parse.
    pub fn with_strategy(
        config: AuthenticatorConfig,
        strategy: Box<dyn GrantStrategy>,
    ) -> Result<Self> {
        let client_id = require_non_empty("client_id", &config.client_id)?;
        let realm = require_non_empty("realm", &config.realm)?;
        let base_url = require_non_empty("base_url", config.base_url.trim_end_matches('/'))?;
        url::Url::parse(&base_url)
            .map_err(|e| {
                AuthEngineError::invalid_argument(format!("invalid base_url {base_url}: {e}"))
            })?;

        let hash = compute_hash(&client_id, &base_url, &realm, strategy.hash_params());
        let endpoints = Endpoints::for_realm(&base_url, &realm).with_overrides(&config.endpoints);
        let client = config.http_client.unwrap_or_default();

        tracing::debug!(
            authenticator = %strategy.kind(),
            client_id = %client_id,
            base_url = %base_url,
            hash = %hash,
            "authenticator created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                strategy,
                hash,
                client_id,
                base_url,
                realm,
                env: config.env,
                platform_url: config.platform_url.filter(|u| !u.trim().is_empty()),
                endpoints,
                scope: config.scope,
                response_type: config.response_type,
                access_type: config.access_type,
                token_store: config.token_store,
                client,
                request_timeout: config.request_timeout,
            }),
        })
    }

    pub fn kind(&self) -> AuthenticatorKind {
        self.inner.strategy.kind()
    }

    pub fn interactive(&self) -> bool {
        self.inner.strategy.interactive()
    }

    /// Credential identity: `{client_id}:{md5 of base URL, realm and hash params}`.
    pub fn hash(&self) -> &str {
        &self.inner.hash
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn realm(&self) -> &str {
        &self.inner.realm
    }

    pub fn env(&self) -> Option<Environment> {
        self.inner.env
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.inner.endpoints
    }

    pub fn token_store(&self) -> Option<&Arc<dyn TokenStore>> {
        self.inner.token_store.as_ref()
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("kind", &self.kind())
            .field("client_id", &self.inner.client_id)
            .field("base_url", &self.inner.base_url)
            .field("realm", &self.inner.realm)
            .field("hash", &self.inner.hash)
            .finish()
    }
}

fn require_non_empty(name: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AuthEngineError::invalid_argument(format!("{name} must be a non-empty string")));
    }
    Ok(value.to_string())
}

/// Whitespace runs in the client id become a single `_`.
fn sanitize_client_id(client_id: &str) -> String {
    client_id.split_whitespace().collect::<Vec<_>>().join("_")
}

fn compute_hash(
    client_id: &str,
    base_url: &str,
    realm: &str,
    params: Map<String, Value>,
) -> String {
    let mut material = params;
    material.insert("baseUrl".into(), Value::String(base_url.into()));
    material.insert("realm".into(), Value::String(realm.into()));

    // serde_json's map is ordered by key, so the digest is stable.
    let digest = Md5::digest(Value::Object(material).to_string().as_bytes());
    format!("{}:{}", sanitize_client_id(client_id), hex::encode(digest))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn config() -> AuthenticatorConfig {
        AuthenticatorConfig::new("test client", "https://login.example.com/")
    }

    #[test]
    fn kind_names_roundtrip() {
        for kind in [
            AuthenticatorKind::Pkce,
            AuthenticatorKind::OwnerPassword,
            AuthenticatorKind::ClientSecret,
            AuthenticatorKind::SignedJwt,
        ] {
            assert_eq!(kind.name().parse::<AuthenticatorKind>().unwrap(), kind);
        }
        assert!("Kerberos".parse::<AuthenticatorKind>().is_err());
    }

    #[test]
    fn construction_validates_base_fields() {
        let mut cfg = config();
        cfg.client_id = "  ".into();
        assert_eq!(Authenticator::pkce(cfg).unwrap_err().code(), "EINVALIDARGUMENT");

        let mut cfg = config();
        cfg.base_url = "///".into();
        assert_eq!(Authenticator::pkce(cfg).unwrap_err().code(), "EINVALIDARGUMENT");

        let mut cfg = config();
        cfg.realm = String::new();
        assert_eq!(Authenticator::pkce(cfg).unwrap_err().code(), "EINVALIDARGUMENT");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let auth = Authenticator::pkce(config()).unwrap();
        assert_eq!(auth.base_url(), "https://login.example.com");
        assert_eq!(
            auth.endpoints().auth,
            "https://login.example.com/auth/realms/Broker/protocol/openid-connect/auth"
        );
    }

    #[test]
    fn hash_is_sanitized_and_stable() {
        let a = Authenticator::pkce(config()).unwrap();
        let b = Authenticator::pkce(config()).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert!(a.hash().starts_with("test_client:"));
        assert_eq!(a.hash().len(), "test_client:".len() + 32);
    }

    #[test]
    fn hash_differs_by_credentials() {
        let alice = Authenticator::owner_password(config(), "alice", "pw").unwrap();
        let bob = Authenticator::owner_password(config(), "bob", "pw").unwrap();
        let alice_again = Authenticator::owner_password(config(), "alice", "other-pw").unwrap();
        assert_ne!(alice.hash(), bob.hash());
        // The password is not part of the identity.
        assert_eq!(alice.hash(), alice_again.hash());

        let s1 = Authenticator::client_secret(config(), "one", true).unwrap();
        let s2 = Authenticator::client_secret(config(), "two", true).unwrap();
        assert_ne!(s1.hash(), s2.hash());

        let pkce = Authenticator::pkce(config()).unwrap();
        assert_ne!(pkce.hash(), alice.hash());
        assert_ne!(pkce.hash(), s1.hash());
    }

    #[test]
    fn hash_differs_by_realm_and_base_url() {
        let a = Authenticator::pkce(config()).unwrap();

        let mut cfg = config();
        cfg.realm = "Other".into();
        assert_ne!(a.hash(), Authenticator::pkce(cfg).unwrap().hash());

        let mut cfg = config();
        cfg.base_url = "https://login-preprod.example.com".into();
        assert_ne!(a.hash(), Authenticator::pkce(cfg).unwrap().hash());
    }

    #[test]
    fn sanitize_collapses_whitespace() {
        assert_eq!(sanitize_client_id("my  cool\tclient"), "my_cool_client");
        assert_eq!(sanitize_client_id("amplify-cli"), "amplify-cli");
    }
}
