//! Hardware keystore: keys held inside a TPM 2.0 module.
//!
//! The module itself is consumed through the blocking [`TpmModule`]
//! capability. Authentication with the module happens once per process via
//! [`TpmSession::initialize`]; the session is then handed to
//! [`HardwareBackend::new`], which refuses an uninitialized session. Private
//! material never leaves the module: handles carry only the persistent TPM
//! handle.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::{JoinError, spawn_blocking};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::backend::{
    BackendKind, GeneratedKey, KeyHandle, KeyPurpose, KeystoreBackend, Signature, ensure_kind,
};
use crate::error::KeystoreError;
use crate::fingerprint::key_id_for;

/// Credentials used to reach and authenticate with the module.
#[derive(Clone)]
pub struct TpmCredentials {
    /// `TPM2TOOLS_TCTI`-style transport string.
    pub tcti: String,
    /// Owner hierarchy authorization value.
    pub owner_auth: Zeroizing<String>,
}

impl TpmCredentials {
    pub fn new(tcti: impl Into<String>, owner_auth: impl Into<String>) -> Self {
        Self {
            tcti: tcti.into(),
            owner_auth: Zeroizing::new(owner_auth.into()),
        }
    }
}

impl std::fmt::Debug for TpmCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TpmCredentials")
            .field("tcti", &self.tcti)
            .field("owner_auth", &"[REDACTED]")
            .finish()
    }
}

/// A key created inside the module.
#[derive(Debug, Clone)]
pub struct TpmKey {
    pub persistent_handle: u32,
    pub public_key: Vec<u8>,
}

/// Blocking primitives of a TPM 2.0 module.
///
/// Every call may block on the device; [`HardwareBackend`] runs them on the
/// blocking thread pool.
pub trait TpmModule: Send + Sync + 'static {
    /// Reach the module and authenticate with the owner hierarchy.
    fn initialize(&self, credentials: &TpmCredentials) -> Result<(), KeystoreError>;

    /// Create and persist a signing key.
    fn create_key(
        &self,
        credentials: &TpmCredentials,
        purpose: KeyPurpose,
    ) -> Result<TpmKey, KeystoreError>;

    /// Sign `payload` with the persisted key. Unknown handles are
    /// [`KeystoreError::KeyNotFound`].
    fn sign(
        &self,
        credentials: &TpmCredentials,
        persistent_handle: u32,
        payload: &[u8],
    ) -> Result<Vec<u8>, KeystoreError>;

    /// Whether the module answers at all.
    fn is_reachable(&self, credentials: &TpmCredentials) -> bool;
}

/// Process-lifetime state of the authenticated module.
pub struct TpmSession {
    module: Arc<dyn TpmModule>,
    credentials: TpmCredentials,
    initialized: Mutex<bool>,
}

impl std::fmt::Debug for TpmSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TpmSession")
            .field("credentials", &self.credentials)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl TpmSession {
    pub fn new(module: Arc<dyn TpmModule>, credentials: TpmCredentials) -> Self {
        Self {
            module,
            credentials,
            initialized: Mutex::new(false),
        }
    }

    /// Authenticate with the module. Idempotent: after the first success
    /// further calls return immediately without touching the device.
    ///
    /// Failure is not retried; the caller is expected to treat it as fatal.
    pub fn initialize(&self) -> Result<(), KeystoreError> {
        let mut initialized = self
            .initialized
            .lock()
            .map_err(|_| KeystoreError::Unavailable("TPM session lock poisoned".to_string()))?;
        if *initialized {
            return Ok(());
        }

        if let Err(e) = self.module.initialize(&self.credentials) {
            warn!(tcti = %self.credentials.tcti, error = %e, "TPM 2.0 initialization failed");
            return Err(e);
        }

        *initialized = true;
        info!(tcti = %self.credentials.tcti, "Initialized TPM 2.0 module");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.lock().is_ok_and(|done| *done)
    }
}

/// Keystore backend delegating to an initialized [`TpmSession`].
#[derive(Debug, Clone)]
pub struct HardwareBackend {
    session: Arc<TpmSession>,
}

impl HardwareBackend {
    pub fn new(session: Arc<TpmSession>) -> Result<Self, KeystoreError> {
        if !session.is_initialized() {
            return Err(KeystoreError::Unavailable(
                "TPM 2.0 module has not been initialized".to_string(),
            ));
        }
        Ok(Self { session })
    }
}

#[async_trait]
impl KeystoreBackend for HardwareBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Hardware
    }

    async fn generate(&self, purpose: KeyPurpose) -> Result<GeneratedKey, KeystoreError> {
        let session = Arc::clone(&self.session);
        let key = spawn_blocking(move || session.module.create_key(&session.credentials, purpose))
            .await
            .map_err(join_err)??;

        let key_id = key_id_for(&key.public_key);
        info!(
            key_id = %key_id,
            purpose = %purpose,
            handle = %fmt_handle(key.persistent_handle),
            "Generated TPM 2.0 key"
        );
        Ok(GeneratedKey {
            handle: KeyHandle::new(
                key_id,
                BackendKind::Hardware,
                fmt_handle(key.persistent_handle),
            ),
            public_key: key.public_key,
        })
    }

    async fn sign(&self, handle: &KeyHandle, payload: &[u8]) -> Result<Signature, KeystoreError> {
        ensure_kind(handle, BackendKind::Hardware)?;
        let persistent_handle = parse_handle(&handle.reference)?;

        let session = Arc::clone(&self.session);
        let payload = payload.to_vec();
        let signature = spawn_blocking(move || {
            session
                .module
                .sign(&session.credentials, persistent_handle, &payload)
        })
        .await
        .map_err(join_err)??;

        debug!(key_id = %handle.key_id, "Signed payload with TPM 2.0 key");
        Ok(Signature::new(signature))
    }

    async fn is_available(&self) -> bool {
        let session = Arc::clone(&self.session);
        spawn_blocking(move || session.module.is_reachable(&session.credentials))
            .await
            .unwrap_or(false)
    }
}

fn join_err(e: JoinError) -> KeystoreError {
    KeystoreError::Unavailable(format!("TPM 2.0 task join error: {e}"))
}

pub(crate) fn fmt_handle(handle: u32) -> String {
    format!("0x{handle:08x}")
}

fn parse_handle(reference: &str) -> Result<u32, KeystoreError> {
    reference
        .strip_prefix("0x")
        .and_then(|hex| u32::from_str_radix(hex, 16).ok())
        .ok_or_else(|| KeystoreError::InvalidHandle(format!("bad TPM handle {reference:?}")))
}
