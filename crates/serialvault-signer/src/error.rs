//! Error types for the `SerialVault` signer.

use serialvault_core::ValidationError;
use serialvault_core::db::DatabaseError;
use serialvault_keystore::{KeyPurpose, KeystoreError};

/// Result type alias for signer operations.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Why a nonce was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NonceError {
    #[error("nonce is unknown")]
    Unknown,

    #[error("nonce has expired")]
    Expired,

    #[error("nonce has already been used")]
    AlreadyUsed,
}

/// Coarse error category, for callers that map errors onto responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authorization,
    Validation,
    NotFound,
    Conflict,
    Nonce,
    Key,
    Backend,
    Storage,
    Internal,
}

/// Error returned by every public signer operation.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The caller's scope does not cover the requested operation.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The model does not exist for the caller or is outside its grant.
    #[error("Model {0} is not authorized for this caller")]
    ModelNotAuthorized(String),

    #[error(transparent)]
    InvalidIdentifier(#[from] ValidationError),

    #[error("Invalid nonce: {0}")]
    Nonce(#[from] NonceError),

    #[error("No active {purpose} key for {authority_id}")]
    NoActiveKey {
        authority_id: String,
        purpose: KeyPurpose,
    },

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Key {0} is disabled")]
    KeyDisabled(String),

    #[error("Keystore unavailable: {0}")]
    KeystoreUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VaultError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_) | Self::ModelNotAuthorized(_) => ErrorKind::Authorization,
            Self::InvalidIdentifier(_) => ErrorKind::Validation,
            Self::Nonce(_) => ErrorKind::Nonce,
            Self::NoActiveKey { .. } | Self::KeyNotFound(_) | Self::KeyDisabled(_) => {
                ErrorKind::Key
            }
            Self::KeystoreUnavailable(_) => ErrorKind::Backend,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }
}

impl From<DatabaseError> for VaultError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(what) => Self::NotFound(what),
            DatabaseError::Conflict(what) => Self::AlreadyExists(what),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<KeystoreError> for VaultError {
    fn from(e: KeystoreError) -> Self {
        match e {
            KeystoreError::KeyNotFound(id) => Self::KeyNotFound(id),
            KeystoreError::InvalidHandle(msg) => Self::KeyNotFound(msg),
            other => Self::KeystoreUnavailable(other.to_string()),
        }
    }
}
