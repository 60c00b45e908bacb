//! Authorization code grant with PKCE, for public clients.

use super::{AuthenticatorKind, FormParams, GrantContext, GrantStrategy};
use crate::error::{AuthEngineError, Result};
use crate::pkce::{CODE_CHALLENGE_METHOD, code_challenge};

/// Interactive login through the browser. No client credential is involved.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pkce;

impl GrantStrategy for Pkce {
    fn kind(&self) -> AuthenticatorKind {
        AuthenticatorKind::Pkce
    }

    fn interactive(&self) -> bool {
        true
    }

    fn token_params(&self, ctx: &GrantContext<'_>) -> Result<FormParams> {
        let code = ctx.code.ok_or_else(|| AuthEngineError::MissingRequiredParameter {
            name: "code".into(),
        })?;
        let redirect_uri = ctx
            .redirect_uri
            .ok_or_else(|| AuthEngineError::MissingRequiredParameter {
                name: "redirect_uri".into(),
            })?;
        let code_verifier = ctx
            .code_verifier
            .ok_or_else(|| AuthEngineError::MissingRequiredParameter {
                name: "code_verifier".into(),
            })?;

        Ok(vec![
            ("grant_type", "authorization_code".into()),
            ("code", code.into()),
            ("redirect_uri", redirect_uri.into()),
            ("code_verifier", code_verifier.into()),
        ])
    }

    fn authorization_url_params(&self, code_verifier: &str) -> FormParams {
        vec![
            ("code_challenge", code_challenge(code_verifier)),
            ("code_challenge_method", CODE_CHALLENGE_METHOD.into()),
        ]
    }
}
