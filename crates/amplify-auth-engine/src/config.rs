//! Environment defaults and option resolution.
//!
//! Options come from three tiers, highest first: the per-call
//! [`AuthOptions`], the options the [`crate::Auth`] instance was built with,
//! and the defaults of the selected [`Environment`]. [`AuthOptions::merge_over`]
//! layers two tiers and [`AuthOptions::resolve`] fills the rest.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use amplify_token_store::TokenStore;
use serde::{Deserialize, Deserializer};

use crate::authenticator::{Authenticator, EndpointOverrides};
use crate::error::{AuthEngineError, Result};

pub const DEFAULT_REALM: &str = "Broker";
pub const DEFAULT_SCOPE: &str = "openid";
pub const DEFAULT_RESPONSE_TYPE: &str = "code";
pub const DEFAULT_ACCESS_TYPE: &str = "offline";
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";
pub const DEFAULT_INTERACTIVE_LOGIN_TIMEOUT_MS: u64 = 120_000;
pub use amplify_token_store::store::DEFAULT_SERVICE_NAME as DEFAULT_SECURE_SERVICE_NAME;

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Platform deployment an [`crate::Auth`] instance talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Environment {
    Dev,
    Staging,
    #[default]
    Prod,
}

/// Endpoints and realm of one [`Environment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentDefaults {
    pub base_url: &'static str,
    pub platform_url: &'static str,
    pub realm: &'static str,
}

impl Environment {
    pub fn name(self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Staging => "staging",
            Self::Prod => "prod",
        }
    }

    pub fn defaults(self) -> EnvironmentDefaults {
        match self {
            Self::Dev => EnvironmentDefaults {
                base_url: "https://login-qa.axway.com",
                platform_url: "https://platform-qa.axway.com",
                realm: DEFAULT_REALM,
            },
            Self::Staging => EnvironmentDefaults {
                base_url: "https://login-preprod.axway.com",
                platform_url: "https://platform-preprod.axway.com",
                realm: DEFAULT_REALM,
            },
            Self::Prod => EnvironmentDefaults {
                base_url: "https://login.axway.com",
                platform_url: "https://platform.axway.com",
                realm: DEFAULT_REALM,
            },
        }
    }
}

impl FromStr for Environment {
    type Err = AuthEngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Dev),
            "staging" | "preprod" => Ok(Self::Staging),
            "prod" | "production" => Ok(Self::Prod),
            other => Err(AuthEngineError::InvalidValue {
                name: "env".into(),
                value: other.into(),
            }),
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = AuthEngineError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Token store selection
// ---------------------------------------------------------------------------

/// Which token store [`crate::Auth`] should create.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStoreType {
    /// Secure, then file, then memory.
    #[default]
    Auto,
    Secure,
    File,
    Memory,
    /// No persistence at all.
    None,
}

/// An explicit `null` disables persistence; an absent field means `auto`.
fn null_store_type<'de, D>(deserializer: D) -> std::result::Result<Option<TokenStoreType>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(
        Option::<TokenStoreType>::deserialize(deserializer)?.unwrap_or(TokenStoreType::None),
    ))
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Options accepted by [`crate::Auth::new`] and by every per-call method.
///
/// Every field is optional; unset fields fall through to the next tier.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthOptions {
    pub base_url: Option<String>,
    pub client_id: Option<String>,
    pub env: Option<Environment>,
    pub realm: Option<String>,
    /// Platform UI used for org selection after an interactive login. An
    /// empty string disables org selection.
    pub platform_url: Option<String>,
    pub endpoints: Option<EndpointOverrides>,

    pub username: Option<String>,
    pub password: Option<String>,
    pub client_secret: Option<String>,
    /// PEM-encoded RSA private key for the signed JWT grant.
    pub secret: Option<String>,
    /// Path to a PEM-encoded RSA private key for the signed JWT grant.
    pub secret_file: Option<PathBuf>,
    /// Use the client secret as a service account (non-interactive).
    pub service_account: Option<bool>,

    pub scope: Option<String>,
    pub response_type: Option<String>,
    pub access_type: Option<String>,

    #[serde(deserialize_with = "null_store_type")]
    pub token_store_type: Option<TokenStoreType>,
    pub token_store_dir: Option<PathBuf>,
    pub secure_service_name: Option<String>,
    /// Seconds before refresh-token expiry at which a session counts as dead.
    pub token_refresh_threshold: Option<u64>,

    /// Milliseconds to wait for the browser leg of an interactive login.
    pub interactive_login_timeout: Option<u64>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    /// Per-request HTTP timeout in milliseconds.
    pub request_timeout: Option<u64>,
    /// Return the authorization URL instead of opening a browser.
    pub manual: Option<bool>,

    /// Use this authenticator instead of building one from credentials.
    #[serde(skip)]
    pub authenticator: Option<Authenticator>,
    /// Use this store instead of building one from `token_store_type`.
    #[serde(skip)]
    pub token_store: Option<Arc<dyn TokenStore>>,
}

impl AuthOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill every unset field of `self` from `base`.
    pub fn merge_over(self, base: &AuthOptions) -> AuthOptions {
        macro_rules! pick {
            ($($field:ident),* $(,)?) => {
                AuthOptions { $($field: self.$field.or_else(|| base.$field.clone()),)* }
            };
        }
        pick!(
            base_url,
            client_id,
            env,
            realm,
            platform_url,
            endpoints,
            username,
            password,
            client_secret,
            secret,
            secret_file,
            service_account,
            scope,
            response_type,
            access_type,
            token_store_type,
            token_store_dir,
            secure_service_name,
            token_refresh_threshold,
            interactive_login_timeout,
            server_host,
            server_port,
            request_timeout,
            manual,
            authenticator,
            token_store,
        )
    }

    /// Apply environment and built-in defaults.
    ///
    /// # Errors
    ///
    /// - [`AuthEngineError::InvalidValue`] if `base_url` is not a URL.
    /// - [`AuthEngineError::InvalidRange`] if the interactive timeout is zero.
    pub fn resolve(&self) -> Result<ResolvedOptions> {
        let env = self.env.unwrap_or_default();
        let defaults = env.defaults();

        let base_url = self
            .base_url
            .clone()
            .unwrap_or_else(|| defaults.base_url.to_string());
        let base_url = base_url.trim_end_matches('/').to_string();
        if url::Url::parse(&base_url).is_err() {
            return Err(AuthEngineError::InvalidValue {
                name: "base_url".into(),
                value: base_url,
            });
        }

        let platform_url = match &self.platform_url {
            Some(url) if url.trim().is_empty() => None,
            Some(url) => Some(url.trim_end_matches('/').to_string()),
            None => Some(defaults.platform_url.to_string()),
        };

        let timeout_ms = self
            .interactive_login_timeout
            .unwrap_or(DEFAULT_INTERACTIVE_LOGIN_TIMEOUT_MS);
        if timeout_ms == 0 {
            return Err(AuthEngineError::InvalidRange {
                name: "interactive_login_timeout".into(),
                reason: "must be greater than zero".into(),
            });
        }

        Ok(ResolvedOptions {
            env,
            base_url,
            platform_url,
            realm: self
                .realm
                .clone()
                .unwrap_or_else(|| defaults.realm.to_string()),
            client_id: self.client_id.clone(),
            scope: self.scope.clone().unwrap_or_else(|| DEFAULT_SCOPE.into()),
            response_type: self
                .response_type
                .clone()
                .unwrap_or_else(|| DEFAULT_RESPONSE_TYPE.into()),
            access_type: self
                .access_type
                .clone()
                .unwrap_or_else(|| DEFAULT_ACCESS_TYPE.into()),
            token_store_type: self.token_store_type.unwrap_or_default(),
            token_store_dir: self.token_store_dir.clone(),
            secure_service_name: self
                .secure_service_name
                .clone()
                .unwrap_or_else(|| DEFAULT_SECURE_SERVICE_NAME.into()),
            token_refresh_threshold: Duration::from_secs(self.token_refresh_threshold.unwrap_or(0)),
            interactive_login_timeout: Duration::from_millis(timeout_ms),
            server_host: self
                .server_host
                .clone()
                .unwrap_or_else(|| DEFAULT_SERVER_HOST.into()),
            server_port: self.server_port.unwrap_or(0),
            request_timeout: self.request_timeout.map(Duration::from_millis),
            manual: self.manual.unwrap_or(false),
        })
    }
}

impl fmt::Debug for AuthOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("AuthOptions")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("env", &self.env)
            .field("realm", &self.realm)
            .field("platform_url", &self.platform_url)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("client_secret", &redact(&self.client_secret))
            .field("secret", &redact(&self.secret))
            .field("secret_file", &self.secret_file)
            .field("token_store_type", &self.token_store_type)
            .field("token_store_dir", &self.token_store_dir)
            .field("manual", &self.manual)
            .field("authenticator", &self.authenticator)
            .field("token_store", &self.token_store.as_ref().map(|s| s.kind()))
            .finish_non_exhaustive()
    }
}

/// Options after every default has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub env: Environment,
    /// Base URL without a trailing slash.
    pub base_url: String,
    pub platform_url: Option<String>,
    pub realm: String,
    pub client_id: Option<String>,
    pub scope: String,
    pub response_type: String,
    pub access_type: String,
    pub token_store_type: TokenStoreType,
    pub token_store_dir: Option<PathBuf>,
    pub secure_service_name: String,
    pub token_refresh_threshold: Duration,
    pub interactive_login_timeout: Duration,
    pub server_host: String,
    pub server_port: u16,
    pub request_timeout: Option<Duration>,
    pub manual: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
