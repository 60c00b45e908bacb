//! Confidential client authenticating with a shared secret.

use serde_json::{Map, Value};

use super::{AuthenticatorKind, FormParams, GrantContext, GrantStrategy};
use crate::error::{AuthEngineError, Result};

/// Client secret credential, either as a service account or as a
/// confidential client fronting a browser login.
pub struct ClientSecret {
    secret: String,
    service_account: bool,
}

impl ClientSecret {
    /// # Errors
    ///
    /// Returns [`AuthEngineError::InvalidArgument`] if `secret` is empty.
    pub fn new(secret: String, service_account: bool) -> Result<Self> {
        if secret.is_empty() {
            return Err(AuthEngineError::invalid_argument(
                "client_secret must be a non-empty string",
            ));
        }
        Ok(Self {
            secret,
            service_account,
        })
    }
}

impl GrantStrategy for ClientSecret {
    fn kind(&self) -> AuthenticatorKind {
        AuthenticatorKind::ClientSecret
    }

    fn interactive(&self) -> bool {
        !self.service_account
    }

    fn hash_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("clientSecret".into(), Value::String(self.secret.clone()));
        params
    }

    fn token_params(&self, ctx: &GrantContext<'_>) -> Result<FormParams> {
        match (ctx.code, ctx.redirect_uri) {
            (Some(code), Some(redirect_uri)) => Ok(vec![
                ("grant_type", "authorization_code".into()),
                ("client_secret", self.secret.clone()),
                ("code", code.into()),
                ("redirect_uri", redirect_uri.into()),
            ]),
            _ if self.service_account => Ok(vec![
                ("grant_type", "client_credentials".into()),
                ("client_secret", self.secret.clone()),
            ]),
            _ => Err(AuthEngineError::MissingRequiredParameter { name: "code".into() }),
        }
    }

    fn refresh_token_params(&self, _ctx: &GrantContext<'_>) -> Result<FormParams> {
        Ok(vec![("client_secret", self.secret.clone())])
    }
}

impl std::fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecret")
            .field("secret", &"<redacted>")
            .field("service_account", &self.service_account)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(code: Option<&'a str>) -> GrantContext<'a> {
        GrantContext {
            client_id: "svc",
            token_endpoint: "https://x/token",
            code,
            redirect_uri: code.map(|_| "http://127.0.0.1:1/callback/A"),
            code_verifier: None,
        }
    }

    #[test]
    fn service_account_uses_client_credentials() {
        let strategy = ClientSecret::new("shh".into(), true).unwrap();
        assert!(!strategy.interactive());
        let params = strategy.token_params(&ctx(None)).unwrap();
        assert!(params.contains(&("grant_type", "client_credentials".into())));
        assert!(params.contains(&("client_secret", "shh".into())));
    }

    #[test]
    fn interactive_exchanges_code() {
        let strategy = ClientSecret::new("shh".into(), false).unwrap();
        assert!(strategy.interactive());
        let params = strategy.token_params(&ctx(Some("c"))).unwrap();
        assert!(params.contains(&("grant_type", "authorization_code".into())));
        assert!(strategy.token_params(&ctx(None)).is_err());
    }

    #[test]
    fn refresh_resupplies_secret() {
        let strategy = ClientSecret::new("shh".into(), true).unwrap();
        assert_eq!(
            strategy.refresh_token_params(&ctx(None)).unwrap(),
            vec![("client_secret", "shh".to_string())]
        );
        assert!(ClientSecret::new(String::new(), true).is_err());
    }
}
