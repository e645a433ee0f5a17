//! Key registry: which keypairs an authority owns, which one is active per
//! purpose, and which backend holds each.
//!
//! Activation swaps the active key in one transaction, and a partial unique
//! index backs the at-most-one-active rule, so readers observe either the old
//! or the new key, never zero or two. Disabling the active key leaves the
//! purpose without one; signing then fails closed with `NoActiveKey`.

use std::sync::Arc;

use serialvault_keystore::{
    BackendKind, KeyHandle, KeyPurpose, KeystoreBackend, KeystoreError, Signature,
};
use tracing::{info, warn};

use crate::auth::{AuthenticatedUser, Authorizer};
use crate::error::{Result, VaultError};
use crate::storage::{DatabaseError, Keypair, NewKeypair, VaultDatabase};

/// Registry over the configured keystore backends.
///
/// The first backend is where new keys are generated; the others stay
/// reachable so keys created under a previous configuration can still sign.
#[derive(Clone)]
pub struct KeyRegistry {
    db: VaultDatabase,
    authorizer: Authorizer,
    backends: Arc<[Arc<dyn KeystoreBackend>]>,
}

impl std::fmt::Debug for KeyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<BackendKind> = self.backends.iter().map(|b| b.kind()).collect();
        f.debug_struct("KeyRegistry")
            .field("backends", &kinds)
            .finish_non_exhaustive()
    }
}

impl KeyRegistry {
    pub fn new(db: VaultDatabase, backends: Vec<Arc<dyn KeystoreBackend>>) -> Self {
        Self {
            authorizer: Authorizer::new(db.clone()),
            db,
            backends: backends.into(),
        }
    }

    /// Generate a key for `purpose` in the primary backend and record it.
    /// The key is activated when the purpose has no active key yet.
    pub async fn generate(
        &self,
        caller: &AuthenticatedUser,
        authority_id: &str,
        purpose: KeyPurpose,
    ) -> Result<Keypair> {
        self.authorizer
            .require_account(caller, authority_id)
            .await?;
        let backend = self
            .backends
            .first()
            .ok_or_else(|| VaultError::KeystoreUnavailable("no keystore configured".into()))?;

        // No transaction is open while the backend works.
        let generated = backend.generate(purpose).await?;

        let keypair = self
            .db
            .insert_keypair(
                &NewKeypair {
                    key_id: &generated.handle.key_id,
                    authority_id,
                    purpose: purpose.as_str(),
                    backend: generated.handle.backend.as_str(),
                    handle_ref: &generated.handle.reference,
                    public_key: &generated.public_key,
                },
                true,
            )
            .await?;

        info!(
            authority_id = %authority_id,
            key_id = %keypair.key_id,
            purpose = %purpose,
            backend = %keypair.backend,
            active = keypair.is_active(),
            "Registered keypair"
        );
        Ok(keypair)
    }

    /// Make `key_id` the active key for its purpose.
    pub async fn activate(
        &self,
        caller: &AuthenticatedUser,
        authority_id: &str,
        key_id: &str,
    ) -> Result<Keypair> {
        self.authorizer
            .require_account(caller, authority_id)
            .await?;

        let (keypair, previous) = self
            .db
            .activate_keypair(authority_id, key_id)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound(_) => VaultError::KeyNotFound(key_id.to_string()),
                DatabaseError::Conflict(_) => {
                    warn!(
                        authority_id = %authority_id,
                        key_id = %key_id,
                        "Refused to activate disabled key"
                    );
                    VaultError::KeyDisabled(key_id.to_string())
                }
                other => other.into(),
            })?;

        info!(
            authority_id = %authority_id,
            key_id = %key_id,
            purpose = %keypair.purpose,
            previous = previous.as_deref().unwrap_or("-"),
            "Activated keypair"
        );
        Ok(keypair)
    }

    /// Disable `key_id`. If it was active its purpose is left without an
    /// active key.
    pub async fn disable(
        &self,
        caller: &AuthenticatedUser,
        authority_id: &str,
        key_id: &str,
    ) -> Result<()> {
        self.authorizer
            .require_account(caller, authority_id)
            .await?;

        if !self.db.disable_keypair(authority_id, key_id).await? {
            return Err(VaultError::KeyNotFound(key_id.to_string()));
        }
        info!(authority_id = %authority_id, key_id = %key_id, "Disabled keypair");
        Ok(())
    }

    /// Keypairs of an account.
    pub async fn list(
        &self,
        caller: &AuthenticatedUser,
        authority_id: &str,
    ) -> Result<Vec<Keypair>> {
        self.authorizer
            .require_account(caller, authority_id)
            .await?;
        Ok(self.db.list_keypairs(authority_id).await?)
    }

    /// The active keypair for an authority and purpose.
    pub async fn active_keypair(&self, authority_id: &str, purpose: KeyPurpose) -> Result<Keypair> {
        self.db
            .active_keypair(authority_id, purpose.as_str())
            .await?
            .ok_or_else(|| VaultError::NoActiveKey {
                authority_id: authority_id.to_string(),
                purpose,
            })
    }

    /// Handle of the active key for an authority and purpose.
    pub async fn active_key_for(
        &self,
        authority_id: &str,
        purpose: KeyPurpose,
    ) -> Result<KeyHandle> {
        Ok(self.active_keypair(authority_id, purpose).await?.handle()?)
    }

    /// Sign with the backend that holds `handle`.
    pub async fn sign_with(
        &self,
        handle: &KeyHandle,
        payload: &[u8],
    ) -> std::result::Result<Signature, KeystoreError> {
        self.backend_for(handle.backend)?
            .sign(handle, payload)
            .await
    }

    /// Whether the backend of `kind` is configured and reachable.
    pub async fn is_available(&self, kind: BackendKind) -> bool {
        match self.backend_for(kind) {
            Ok(backend) => backend.is_available().await,
            Err(_) => false,
        }
    }

    fn backend_for(
        &self,
        kind: BackendKind,
    ) -> std::result::Result<&Arc<dyn KeystoreBackend>, KeystoreError> {
        self.backends
            .iter()
            .find(|b| b.kind() == kind)
            .ok_or_else(|| KeystoreError::Unavailable(format!("no {kind} keystore configured")))
    }
}
