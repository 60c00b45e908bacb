//! Token store error types.
//!
//! Every backend surfaces failures through [`TokenStoreError`]. Callers that
//! cascade between backends (the `auto` store selection in the auth engine)
//! branch on [`TokenStoreError::code`] rather than on message strings.

/// Unified error type for the token store crate.
#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    // -- Construction errors ------------------------------------------------
    /// A required constructor parameter (usually the store directory) was
    /// not supplied.
    #[error("missing required parameter: {name}")]
    MissingRequiredParameter { name: String },

    // -- Crypto errors ------------------------------------------------------
    /// The store payload could not be decrypted (wrong key or corrupt file).
    #[error("decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    // -- Keychain errors ----------------------------------------------------
    /// The OS secret manager is missing or refused access.
    #[error("secure store unavailable: {reason}")]
    SecretStoreUnavailable { reason: String },

    /// No encryption key has been stored in the keychain yet.
    #[error("encryption key not found in keychain")]
    KeyNotFound,

    // -- Underlying errors --------------------------------------------------
    /// I/O error from the filesystem.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-all for unexpected internal errors.
    #[error("internal token store error: {0}")]
    Internal(String),
}

impl TokenStoreError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingRequiredParameter { .. } => "EMISSINGREQUIREDPARAMETER",
            Self::DecryptionFailed { .. } => "EDECRYPTIONFAILED",
            Self::SecretStoreUnavailable { .. } => "ESECRETSTOREUNAVAILABLE",
            Self::KeyNotFound => "EKEYNOTFOUND",
            Self::Io(_) => "EIO",
            Self::Serialization(_) => "ESERIALIZATION",
            Self::Internal(_) => "EINTERNAL",
        }
    }
}

/// Convenience alias used throughout the token store crate.
pub type Result<T> = std::result::Result<T, TokenStoreError>;
