//! Keystore error types.

/// Errors from keystore backends.
#[derive(Debug, thiserror::Error)]
pub enum KeystoreError {
    /// The backend cannot be reached or is not initialized.
    #[error("Keystore unavailable: {0}")]
    Unavailable(String),

    /// The handle does not name a key this backend holds.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The handle belongs to a different backend or is malformed.
    #[error("Invalid key handle: {0}")]
    InvalidHandle(String),

    /// Sealing or unsealing stored key material failed.
    #[error("Key sealing failed: {0}")]
    Sealing(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl KeystoreError {
    /// Whether the failure means the backend itself is unusable, as opposed
    /// to a problem with one particular key.
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::IoError(_))
    }
}
