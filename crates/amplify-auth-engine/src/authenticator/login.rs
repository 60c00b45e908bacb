//! Login orchestration for a single authenticator.
//!
//! Non-interactive grants go straight to the token endpoint. Interactive
//! grants register a callback on a [`CallbackServer`], send the user to the
//! authorization endpoint and wait for the redirect. When a platform URL is
//! configured the code callback redirects the browser on to the platform's
//! org picker and the login also waits for that second redirect.

use std::time::Duration;

use amplify_token_store::{Account, AccountOrg};
use futures::future::BoxFuture;
use url::Url;

use super::{Authenticator, TokenRequest};
use crate::callback::{
    CallbackRequest, CallbackResponse, CallbackServer, CallbackServerOptions, CancelHandle,
};
use crate::error::{AuthEngineError, Result};
use crate::pkce::generate_code_verifier;

/// Options for [`Authenticator::login`].
#[derive(Debug, Clone, Default)]
pub struct LoginOptions {
    /// Return the authorization URL instead of opening a browser.
    pub manual: bool,
    /// Deadline for each browser redirect. Defaults to the server's.
    pub timeout: Option<Duration>,
    /// Listener to register callbacks on. A private one is created if unset.
    pub server: Option<CallbackServer>,
}

/// Result of [`Authenticator::login`].
pub enum LoginOutcome {
    Complete(Account),
    /// Manual interactive login: the caller presents `url` and awaits
    /// `account`.
    Pending(PendingLogin),
}

impl LoginOutcome {
    /// Wait for the login to finish.
    pub async fn into_account(self) -> Result<Account> {
        match self {
            Self::Complete(account) => Ok(account),
            Self::Pending(pending) => pending.account.await,
        }
    }
}

impl std::fmt::Debug for LoginOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(account) => f.debug_tuple("Complete").field(&account.name).finish(),
            Self::Pending(pending) => f.debug_tuple("Pending").field(&pending.url).finish(),
        }
    }
}

/// An interactive login waiting for the browser.
pub struct PendingLogin {
    /// Authorization URL to open.
    pub url: String,
    /// Aborts the wait for the code redirect.
    pub cancel: CancelHandle,
    /// Resolves with the stored account once the redirect is handled.
    pub account: BoxFuture<'static, Result<Account>>,
}

/// What the code callback hands back to the login future.
type CodeOutcome = (Account, Option<BoxFuture<'static, Result<Option<String>>>>);

impl Authenticator {
    /// Authenticate with this authenticator's grant.
    ///
    /// # Errors
    ///
    /// Token exchange errors for non-interactive grants; callback server
    /// errors for interactive ones. Errors that happen after the browser
    /// leg surface through the pending future.
    pub async fn login(&self, options: LoginOptions) -> Result<LoginOutcome> {
        if !self.interactive() {
            let account = self.get_token(TokenRequest::default()).await?;
            let account = self.enrich(account).await;
            tracing::info!(account = %account.name, "login completed");
            return Ok(LoginOutcome::Complete(account));
        }

        let server = options
            .server
            .unwrap_or_else(|| CallbackServer::new(CallbackServerOptions::default()));
        let timeout = options.timeout;
        let code_verifier = generate_code_verifier()?;

        let this = self.clone();
        let handler_server = server.clone();
        let verifier = code_verifier.clone();
        let callback = server.create_callback(move |request: CallbackRequest| async move {
            this.handle_code_redirect(request, verifier, handler_server, timeout)
                .await
        })?;

        let url = self.authorization_url(callback.url(), &code_verifier)?;
        let cancel = callback.cancel_handle();
        let code_future = callback.start(timeout);

        let this = self.clone();
        let account: BoxFuture<'static, Result<Account>> = Box::pin(async move {
            let (account, org_select) = code_future.await?;
            let account = match org_select {
                Some(org_select) => this.finish_org_select(account, org_select.await?).await?,
                None => account,
            };
            tracing::info!(account = %account.name, "login completed");
            Ok(account)
        });

        if options.manual {
            return Ok(LoginOutcome::Pending(PendingLogin { url, cancel, account }));
        }

        tracing::info!(url = %url, "opening browser for login");
        if let Err(e) = open::that(&url) {
            tracing::warn!(
                error = %e,
                url = %url,
                "could not open a browser, visit the URL manually"
            );
        }
        Ok(LoginOutcome::Complete(account.await?))
    }

    /// Build the authorization endpoint URL for `redirect_uri`.
    pub fn authorization_url(&self, redirect_uri: &str, code_verifier: &str) -> Result<String> {
        let inner = &self.inner;
        let mut url = Url::parse(&inner.endpoints.auth)?;
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("access_type", &inner.access_type);
            params.append_pair("client_id", &inner.client_id);
            params.append_pair("redirect_uri", redirect_uri);
            params.append_pair("response_type", &inner.response_type);
            params.append_pair("scope", &inner.scope);
            for (name, value) in inner.strategy.authorization_url_params(code_verifier) {
                params.append_pair(name, &value);
            }
        }
        Ok(url.to_string())
    }

    async fn handle_code_redirect(
        &self,
        request: CallbackRequest,
        code_verifier: String,
        server: CallbackServer,
        timeout: Option<Duration>,
    ) -> Result<(CallbackResponse, CodeOutcome)> {
        if let Some(error) = request.param("error") {
            let reason = match request.param("error_description") {
                Some(description) => format!("{error}: {description}"),
                None => error.to_string(),
            };
            return Err(AuthEngineError::AuthFailed { reason });
        }
        let code = request
            .param("code")
            .ok_or_else(|| AuthEngineError::auth_failed("callback missing 'code' parameter"))?
            .to_string();

        let redirect_uri = {
            let mut url = request.url.clone();
            url.set_query(None);
            url.to_string()
        };

        let account = self
            .get_token(TokenRequest {
                code: Some(code),
                redirect_uri: Some(redirect_uri),
                code_verifier: Some(code_verifier),
                account: None,
            })
            .await?;
        let account = self.enrich(account).await;

        let Some(platform_url) = self.inner.platform_url.as_deref() else {
            return Ok((CallbackResponse::success_page(), (account, None)));
        };

        let org_callback = server.create_callback(|request: CallbackRequest| async move {
            let org_id = request.param("org_id").map(String::from);
            Ok((CallbackResponse::success_page(), org_id))
        })?;
        let location = format!(
            "{platform_url}/#/auth/org.select?redirect={}",
            url::form_urlencoded::byte_serialize(org_callback.url().as_bytes()).collect::<String>()
        );
        tracing::debug!(account = %account.name, "redirecting to org selection");

        Ok((
            CallbackResponse::redirect(&location),
            (account, Some(org_callback.start(timeout))),
        ))
    }

    async fn finish_org_select(
        &self,
        mut account: Account,
        org_id: Option<String>,
    ) -> Result<Account> {
        if let Some(org_id) = org_id {
            tracing::debug!(account = %account.name, org_id = %org_id, "org selected");
            account.org = Some(AccountOrg {
                id: Some(org_id),
                ..AccountOrg::default()
            });
            if let Some(store) = &self.inner.token_store {
                store.set(account.clone()).await?;
            }
        }
        // The selected org shows up in userinfo.
        Ok(self.enrich(account).await)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
