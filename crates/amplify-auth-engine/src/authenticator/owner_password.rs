//! Resource owner password grant.

use serde_json::{Map, Value};

use super::{AuthenticatorKind, FormParams, GrantContext, GrantStrategy};
use crate::error::{AuthEngineError, Result};

/// Logs in with a username and password, no browser involved.
pub struct OwnerPassword {
    username: String,
    password: String,
}

impl OwnerPassword {
    /// # Errors
    ///
    /// Returns [`AuthEngineError::InvalidArgument`] if either value is empty.
    pub fn new(username: String, password: String) -> Result<Self> {
        if username.trim().is_empty() {
            return Err(AuthEngineError::invalid_argument("username must be a non-empty string"));
        }
        if password.is_empty() {
            return Err(AuthEngineError::invalid_argument("password must be a non-empty string"));
        }
        Ok(Self { username, password })
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl GrantStrategy for OwnerPassword {
    fn kind(&self) -> AuthenticatorKind {
        AuthenticatorKind::OwnerPassword
    }

    fn hash_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("username".into(), Value::String(self.username.clone()));
        params
    }

    fn token_params(&self, _ctx: &GrantContext<'_>) -> Result<FormParams> {
        Ok(vec![
            ("grant_type", "password".into()),
            ("username", self.username.clone()),
            ("password", self.password.clone()),
        ])
    }
}

impl std::fmt::Debug for OwnerPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerPassword")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
