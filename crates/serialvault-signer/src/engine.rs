//! Signing engine: turns an authorized request and a fresh nonce into a
//! signed serial assertion, logging every attempt.
//!
//! Order of an attempt:
//! 1. validate model name and serial number
//! 2. resolve the model within the caller's scope
//! 3. consume the nonce
//! 4. resolve the active serial key (once per attempt)
//! 5. build the canonical payload and its fingerprint
//! 6. sign through the backend, bounded by the backend timeout
//! 7. append the signing log entry, whatever the outcome
//!
//! Nothing is mutated before step 3, so validation and authorization
//! failures leave no trace beyond their log entry.

use std::time::Duration;

use serde::Serialize;
use serialvault_core::db::unix_timestamp;
use serialvault_core::{validate_model_name, validate_serial_number};
use serialvault_keystore::{KeyPurpose, Signature, fingerprint_of};
use tracing::{error, info, warn};

use crate::audit::{AuditEntry, AuditLog, SigningOutcome};
use crate::auth::{AuthenticatedUser, Authorizer};
use crate::error::{Result, VaultError};
use crate::nonce::NonceLedger;
use crate::registry::KeyRegistry;
use crate::storage::VaultDatabase;

/// A device's request for a serial assertion.
#[derive(Debug, Clone)]
pub struct SignRequest {
    pub model: String,
    pub serial_number: String,
    pub nonce: String,
}

impl SignRequest {
    pub fn new(
        model: impl Into<String>,
        serial_number: impl Into<String>,
        nonce: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            serial_number: serial_number.into(),
            nonce: nonce.into(),
        }
    }
}

/// A signed assertion and where it was logged.
#[derive(Debug, Clone)]
pub struct SignedAssertion {
    /// Canonical JSON payload that was signed.
    pub payload: String,
    pub signature: Signature,
    /// Hex SHA-256 of `payload`.
    pub fingerprint: String,
    pub key_id: String,
    pub log_id: i64,
}

/// Canonical serial assertion. Field order is fixed by declaration order.
#[derive(Serialize)]
struct SerialAssertion<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "authority-id")]
    authority_id: &'a str,
    #[serde(rename = "brand-id")]
    brand_id: &'a str,
    model: &'a str,
    serial: &'a str,
    #[serde(rename = "sign-key-id")]
    sign_key_id: &'a str,
    nonce: &'a str,
    timestamp: i64,
}

struct Signed {
    payload: String,
    signature: Signature,
    fingerprint: String,
    key_id: String,
}

#[derive(Clone)]
pub struct SigningEngine {
    authorizer: Authorizer,
    registry: KeyRegistry,
    nonces: NonceLedger,
    audit: AuditLog,
    backend_timeout: Duration,
}

impl SigningEngine {
    pub fn new(
        db: VaultDatabase,
        registry: KeyRegistry,
        nonces: NonceLedger,
        audit: AuditLog,
        backend_timeout: Duration,
    ) -> Self {
        Self {
            authorizer: Authorizer::new(db),
            registry,
            nonces,
            audit,
            backend_timeout,
        }
    }

    /// Sign a serial assertion for `request` on behalf of `authority_id`.
    ///
    /// Runs as its own task: dropping the returned future does not stop the
    /// attempt, so its log entry is always written.
    pub async fn sign(
        &self,
        caller: &AuthenticatedUser,
        authority_id: &str,
        request: SignRequest,
    ) -> Result<SignedAssertion> {
        let engine = self.clone();
        let caller = caller.clone();
        let authority_id = authority_id.to_string();

        tokio::spawn(async move { engine.attempt(&caller, &authority_id, request).await })
            .await
            .map_err(|e| VaultError::Internal(format!("signing task failed: {e}")))?
    }

    async fn attempt(
        &self,
        caller: &AuthenticatedUser,
        authority_id: &str,
        request: SignRequest,
    ) -> Result<SignedAssertion> {
        let mut entry = AuditEntry::new(authority_id, &request.model, &request.serial_number);
        entry.nonce = Some(request.nonce.clone());

        let result = self.run(caller, authority_id, &request, &mut entry).await;
        entry.outcome = match &result {
            Ok(_) => SigningOutcome::Success,
            Err(e) => SigningOutcome::from(e),
        };

        let log_id = match self.audit.record(&entry).await {
            Ok(id) => id,
            Err(e) => {
                error!(
                    authority_id = %authority_id,
                    model = %request.model,
                    serial = %request.serial_number,
                    outcome = %entry.outcome,
                    error = %e,
                    "Failed to write signing log"
                );
                return Err(e);
            }
        };

        match result {
            Ok(signed) => {
                info!(
                    authority_id = %authority_id,
                    model = %request.model,
                    serial = %request.serial_number,
                    key_id = %signed.key_id,
                    fingerprint = %signed.fingerprint,
                    outcome = %entry.outcome,
                    log_id,
                    "Signed serial assertion"
                );
                Ok(SignedAssertion {
                    payload: signed.payload,
                    signature: signed.signature,
                    fingerprint: signed.fingerprint,
                    key_id: signed.key_id,
                    log_id,
                })
            }
            Err(e) => {
                warn!(
                    authority_id = %authority_id,
                    model = %request.model,
                    serial = %request.serial_number,
                    outcome = %entry.outcome,
                    log_id,
                    error = %e,
                    "Signing attempt failed"
                );
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        caller: &AuthenticatedUser,
        authority_id: &str,
        request: &SignRequest,
        entry: &mut AuditEntry,
    ) -> Result<Signed> {
        validate_model_name(&request.model)?;
        validate_serial_number(&request.serial_number)?;

        let model = self
            .authorizer
            .authorize_model(caller, authority_id, &request.model)
            .await?;

        self.nonces.consume(&request.nonce).await?;

        // Resolved once: a concurrent activation does not change the key
        // this attempt signs with.
        let keypair = self
            .registry
            .active_keypair(&model.brand_id, KeyPurpose::Serial)
            .await?;
        entry.key_id = Some(keypair.key_id.clone());
        let handle = keypair.handle()?;

        let payload = serde_json::to_string(&SerialAssertion {
            kind: "serial",
            authority_id,
            brand_id: &model.brand_id,
            model: &model.name,
            serial: &request.serial_number,
            sign_key_id: &keypair.key_id,
            nonce: &request.nonce,
            timestamp: unix_timestamp(),
        })
        .map_err(|e| VaultError::Internal(format!("encode assertion: {e}")))?;
        let fingerprint = fingerprint_of(payload.as_bytes());
        entry.fingerprint = Some(fingerprint.clone());

        let signature = tokio::time::timeout(
            self.backend_timeout,
            self.registry.sign_with(&handle, payload.as_bytes()),
        )
        .await
        .map_err(|_| {
            VaultError::KeystoreUnavailable(format!(
                "keystore did not answer within {}s",
                self.backend_timeout.as_secs()
            ))
        })??;

        Ok(Signed {
            payload,
            signature,
            fingerprint,
            key_id: keypair.key_id,
        })
    }
}
