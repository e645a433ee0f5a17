//! Signing log: one append-only entry per signing attempt.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::auth::{AuthenticatedUser, Authorizer};
use crate::error::{NonceError, Result, VaultError};
use crate::storage::{NewSigningLog, SigningLog, VaultDatabase};

/// Largest page `list_for_account` returns.
pub const MAX_PAGE: i64 = 500;

/// How a signing attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SigningOutcome {
    Success,
    Unauthorized,
    ModelNotAuthorized,
    InvalidIdentifier,
    NonceUnknown,
    NonceExpired,
    NonceAlreadyUsed,
    NoActiveKey,
    KeyNotFound,
    KeystoreUnavailable,
    Failed,
}

impl SigningOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Unauthorized => "unauthorized",
            Self::ModelNotAuthorized => "model-not-authorized",
            Self::InvalidIdentifier => "invalid-identifier",
            Self::NonceUnknown => "nonce-unknown",
            Self::NonceExpired => "nonce-expired",
            Self::NonceAlreadyUsed => "nonce-already-used",
            Self::NoActiveKey => "no-active-key",
            Self::KeyNotFound => "key-not-found",
            Self::KeystoreUnavailable => "keystore-unavailable",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SigningOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningOutcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        [
            Self::Success,
            Self::Unauthorized,
            Self::ModelNotAuthorized,
            Self::InvalidIdentifier,
            Self::NonceUnknown,
            Self::NonceExpired,
            Self::NonceAlreadyUsed,
            Self::NoActiveKey,
            Self::KeyNotFound,
            Self::KeystoreUnavailable,
            Self::Failed,
        ]
        .into_iter()
        .find(|o| o.as_str() == s)
        .ok_or_else(|| format!("unknown signing outcome {s:?}"))
    }
}

impl From<&VaultError> for SigningOutcome {
    fn from(e: &VaultError) -> Self {
        match e {
            VaultError::Unauthorized(_) => Self::Unauthorized,
            VaultError::ModelNotAuthorized(_) => Self::ModelNotAuthorized,
            VaultError::InvalidIdentifier(_) => Self::InvalidIdentifier,
            VaultError::Nonce(NonceError::Unknown) => Self::NonceUnknown,
            VaultError::Nonce(NonceError::Expired) => Self::NonceExpired,
            VaultError::Nonce(NonceError::AlreadyUsed) => Self::NonceAlreadyUsed,
            VaultError::NoActiveKey { .. } => Self::NoActiveKey,
            VaultError::KeyNotFound(_) | VaultError::KeyDisabled(_) => Self::KeyNotFound,
            VaultError::KeystoreUnavailable(_) => Self::KeystoreUnavailable,
            VaultError::NotFound(_)
            | VaultError::AlreadyExists(_)
            | VaultError::Storage(_)
            | VaultError::Internal(_) => Self::Failed,
        }
    }
}

/// An attempt as it will be written to the log.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub make: String,
    pub model: String,
    pub serial_number: String,
    pub fingerprint: Option<String>,
    pub nonce: Option<String>,
    pub key_id: Option<String>,
    pub outcome: SigningOutcome,
}

impl AuditEntry {
    /// A new entry; the outcome is `Failed` until set otherwise.
    pub fn new(
        make: impl Into<String>,
        model: impl Into<String>,
        serial_number: impl Into<String>,
    ) -> Self {
        Self {
            make: make.into(),
            model: model.into(),
            serial_number: serial_number.into(),
            fingerprint: None,
            nonce: None,
            key_id: None,
            outcome: SigningOutcome::Failed,
        }
    }
}

/// Append-only signing log with read-only queries.
#[derive(Clone)]
pub struct AuditLog {
    db: VaultDatabase,
    authorizer: Authorizer,
}

impl AuditLog {
    pub fn new(db: VaultDatabase) -> Self {
        Self {
            authorizer: Authorizer::new(db.clone()),
            db,
        }
    }

    /// Append `entry`, returning its id.
    pub async fn record(&self, entry: &AuditEntry) -> Result<i64> {
        let id = self
            .db
            .insert_signing_log(&NewSigningLog {
                make: &entry.make,
                model: &entry.model,
                serial_number: &entry.serial_number,
                fingerprint: entry.fingerprint.as_deref(),
                nonce: entry.nonce.as_deref(),
                key_id: entry.key_id.as_deref(),
                outcome: entry.outcome.as_str(),
            })
            .await?;
        Ok(id)
    }

    /// Entries of the caller's account for one serial number.
    pub async fn list_by_serial(
        &self,
        caller: &AuthenticatedUser,
        authority_id: &str,
        serial_number: &str,
    ) -> Result<Vec<SigningLog>> {
        self.authorizer
            .require_account(caller, authority_id)
            .await?;
        Ok(self
            .db
            .list_signing_logs_by_serial(authority_id, serial_number)
            .await?)
    }

    /// Entries of the caller's account for one payload fingerprint.
    pub async fn list_by_fingerprint(
        &self,
        caller: &AuthenticatedUser,
        authority_id: &str,
        fingerprint: &str,
    ) -> Result<Vec<SigningLog>> {
        self.authorizer
            .require_account(caller, authority_id)
            .await?;
        Ok(self
            .db
            .list_signing_logs_by_fingerprint(authority_id, fingerprint)
            .await?)
    }

    /// A page of the account's entries, newest first.
    pub async fn list_for_account(
        &self,
        caller: &AuthenticatedUser,
        authority_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SigningLog>> {
        self.authorizer
            .require_account(caller, authority_id)
            .await?;
        Ok(self
            .db
            .list_signing_logs(authority_id, limit.clamp(0, MAX_PAGE), offset.max(0))
            .await?)
    }

    /// Total entries across all accounts.
    pub async fn count(&self) -> Result<i64> {
        Ok(self.db.count_signing_logs().await?)
    }
}
