//! Error types for the auth engine crate.
//!
//! All auth engine operations surface errors through [`AuthEngineError`].
//! Callers that need to branch on the failure kind should match on the
//! variant or compare [`AuthEngineError::code`], which is stable across
//! releases.

use amplify_token_store::TokenStoreError;

/// Unified error type for the Amplify auth engine.
#[derive(Debug, thiserror::Error)]
pub enum AuthEngineError {
    /// A caller-supplied argument is missing or malformed.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What is wrong with the argument.
        reason: String,
    },

    /// A named option has the wrong shape.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// A named option has an unacceptable value.
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },

    /// A numeric option is outside its permitted range.
    #[error("{name} out of range: {reason}")]
    InvalidRange { name: String, reason: String },

    /// A required option was not supplied.
    #[error("missing required parameter: {name}")]
    MissingRequiredParameter {
        /// The option name.
        name: String,
    },

    /// The authorization server rejected the request or answered with
    /// something we could not use.
    #[error("authentication failed: {reason}")]
    AuthFailed {
        /// Details from the server or the parser.
        reason: String,
    },

    /// The refresh token or authorization code is permanently invalid.
    /// The session must be discarded and the user must log in again.
    #[error("invalid grant: {reason}")]
    InvalidGrant {
        /// Explanation from the authorization server.
        reason: String,
    },

    /// An interactive login did not complete before its deadline.
    #[error("authentication timed out after {timeout_ms} ms")]
    AuthTimeout {
        /// How long we waited.
        timeout_ms: u64,
    },

    /// A pending callback was cancelled by the caller.
    #[error("authentication cancelled")]
    Cancelled,

    /// The callback server was stopped while the callback was pending.
    #[error("callback server stopped")]
    ServerStopped,

    /// A key file could not be read.
    #[error("invalid file {path}: {reason}")]
    InvalidFile { path: String, reason: String },

    /// The signing key is not a usable PEM-encoded RSA private key.
    #[error("invalid signing key: {reason}")]
    InvalidSigningKey { reason: String },

    /// The userinfo endpoint rejected the access token.
    #[error("access token rejected by the userinfo endpoint")]
    Unauthorized,

    /// An HTTP request to the authorization server failed.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// An error propagated from the token store.
    #[error("token store error: {0}")]
    Store(#[from] TokenStoreError),

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (e.g. from the callback TCP listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing error.
    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl AuthEngineError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "EINVALIDARGUMENT",
            Self::InvalidParameter { .. } => "EINVALIDPARAMETER",
            Self::InvalidValue { .. } => "EINVALIDVALUE",
            Self::InvalidRange { .. } => "EINVALIDRANGE",
            Self::MissingRequiredParameter { .. } => "EMISSINGREQUIREDPARAMETER",
            Self::AuthFailed { .. } => "EAUTHFAILED",
            Self::InvalidGrant { .. } => "EINVALIDGRANT",
            Self::AuthTimeout { .. } => "EAUTHTIMEOUT",
            Self::Cancelled => "ECANCELLED",
            Self::ServerStopped => "ESERVERSTOPPED",
            Self::InvalidFile { .. } => "EINVALIDFILE",
            Self::InvalidSigningKey { .. } => "EINVALIDSIGNINGKEY",
            Self::Unauthorized => "EUNAUTHORIZED",
            Self::Network(_) => "ENETWORK",
            Self::Store(e) => e.code(),
            Self::Serialization(_) => "ESERIALIZATION",
            Self::Io(_) => "EIO",
            Self::UrlParse(_) => "EINVALIDARGUMENT",
        }
    }

    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn auth_failed(reason: impl Into<String>) -> Self {
        Self::AuthFailed {
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AuthEngineError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
