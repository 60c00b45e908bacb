//! OAuth 2.0 / OpenID Connect client auth engine for the Amplify platform.
//!
//! This crate obtains, caches, refreshes and revokes tokens against a
//! Keycloak-style identity server:
//!
//! - **Authorization Code Flow** with PKCE (RFC 7636), through the browser
//! - **Resource Owner Password** grant
//! - **Client Secret**, as a service account or through the browser
//! - **Signed JWT** client assertions (RFC 7523)
//! - **Local callback server** for browser redirects, shared by concurrent
//!   logins
//!
//! Sessions are persisted through [`amplify_token_store`]. The [`Auth`]
//! orchestrator picks an authenticator from the supplied credentials and
//! refreshes stored sessions transparently.
//!
//! # Architecture
//!
//! ```text
//! Auth
//! ├── Authenticator   (PKCE | OwnerPassword | ClientSecret | SignedJWT)
//! ├── CallbackServer  (loopback HTTP listener)
//! └── TokenStore      (memory | file | secure)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use amplify_auth_engine::{Auth, AuthOptions};
//!
//! # async fn example() -> amplify_auth_engine::Result<()> {
//! let auth = Auth::new(AuthOptions {
//!     client_id: Some("amplify-cli".into()),
//!     token_store_dir: Some("/home/me/.axway/auth".into()),
//!     ..AuthOptions::default()
//! })?;
//!
//! let account = auth.login(AuthOptions::default()).await?.into_account().await?;
//! println!("logged in as {}", account.name);
//!
//! if let Some(account) = auth.find(&account.name, &AuthOptions::default()).await? {
//!     println!("access token expires at {}", account.auth.expires.access);
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod authenticator;
pub mod callback;
pub mod config;
pub mod error;
pub mod jwt;
pub mod pkce;

// Re-export key types at the crate root for convenience.
pub use auth::{Auth, LogoutRequest};
pub use authenticator::{
    Authenticator, AuthenticatorConfig, AuthenticatorKind, GrantStrategy, LoginOptions,
    LoginOutcome, PendingLogin,
    SigningKeySource, TokenRequest,
};
pub use callback::{CallbackServer, CallbackServerOptions};
pub use config::{AuthOptions, Environment, TokenStoreType};
pub use error::{AuthEngineError, Result};

pub use amplify_token_store::{Account, TokenStore};
