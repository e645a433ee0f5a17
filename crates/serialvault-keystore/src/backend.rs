//! The keystore backend capability and the handle types it trades in.
//!
//! Callers operate on [`KeyHandle`]s, never on raw private key bytes. A
//! handle names a key inside one backend; only that backend can sign with it.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::KeystoreError;

/// Where a key's private material lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Software,
    Hardware,
}

impl BackendKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Software => "software",
            Self::Hardware => "hardware",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = KeystoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "software" => Ok(Self::Software),
            "hardware" => Ok(Self::Hardware),
            other => Err(KeystoreError::InvalidHandle(format!("unknown backend kind {other:?}"))),
        }
    }
}

/// What a key signs. Each authority has at most one active key per purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyPurpose {
    /// Device serial assertions.
    Serial,
    /// System-user assertions.
    SystemUser,
}

impl KeyPurpose {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::SystemUser => "system-user",
        }
    }
}

impl fmt::Display for KeyPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyPurpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serial" => Ok(Self::Serial),
            "system-user" => Ok(Self::SystemUser),
            other => Err(format!("unknown key purpose {other:?}")),
        }
    }
}

/// Opaque reference to a key held by a backend.
///
/// `reference` is backend specific: a sealed key file name for the software
/// backend, a persistent TPM handle for the hardware backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyHandle {
    pub key_id: String,
    pub backend: BackendKind,
    pub reference: String,
}

impl KeyHandle {
    pub fn new(
        key_id: impl Into<String>,
        backend: BackendKind,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            key_id: key_id.into(),
            backend,
            reference: reference.into(),
        }
    }
}

/// A freshly generated key: its handle plus the public half.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    pub handle: KeyHandle,
    pub public_key: Vec<u8>,
}

/// Raw signature bytes as produced by the backend.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

/// Uniform capability over where keys live and how signing is performed.
///
/// Implementations must be safe to call from many tasks at once. `generate`
/// and `sign` may block on external hardware; callers must not hold locks or
/// database transactions across them.
#[async_trait]
pub trait KeystoreBackend: Send + Sync {
    /// Which kind of handles this backend issues and accepts.
    fn kind(&self) -> BackendKind;

    /// Create a new key for `purpose`.
    async fn generate(&self, purpose: KeyPurpose) -> Result<GeneratedKey, KeystoreError>;

    /// Sign `payload` with the key behind `handle`.
    ///
    /// Fails with [`KeystoreError::Unavailable`] when the backend cannot be
    /// reached and [`KeystoreError::KeyNotFound`] when the handle is unknown.
    async fn sign(&self, handle: &KeyHandle, payload: &[u8]) -> Result<Signature, KeystoreError>;

    /// Cheap reachability check.
    async fn is_available(&self) -> bool;
}

/// Reject handles issued by a different backend.
pub(crate) fn ensure_kind(handle: &KeyHandle, expected: BackendKind) -> Result<(), KeystoreError> {
    if handle.backend == expected {
        Ok(())
    } else {
        Err(KeystoreError::InvalidHandle(format!(
            "key {} belongs to the {} backend, not {expected}",
            handle.key_id, handle.backend
        )))
    }
}
