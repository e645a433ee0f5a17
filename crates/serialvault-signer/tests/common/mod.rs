//! Shared fixtures for signer integration tests.

#![allow(clippy::unwrap_used, dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::{Signature as EdSignature, Verifier as _, VerifyingKey};
use tempfile::TempDir;
use tokio::sync::Notify;

use serialvault_keystore::{
    BackendKind, GeneratedKey, KeyHandle, KeyPurpose, KeystoreBackend, KeystoreError, Signature,
    SoftwareBackend,
};
use serialvault_signer::storage::Keypair;
use serialvault_signer::{AuthenticatedUser, Vault, VaultDatabase, VaultSettings};

pub const AUTHORITY: &str = "vendor1";
pub const MODEL: &str = "router-3400";

pub fn owner() -> AuthenticatedUser {
    AuthenticatedUser::account("alice", AUTHORITY)
}

/// Wraps a real backend, counting sign calls and optionally holding or
/// slowing them down.
pub struct CountingBackend {
    inner: Arc<dyn KeystoreBackend>,
    signs: AtomicUsize,
    delay_ms: AtomicU64,
    held: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl CountingBackend {
    pub fn new(inner: Arc<dyn KeystoreBackend>) -> Self {
        Self {
            inner,
            signs: AtomicUsize::new(0),
            delay_ms: AtomicU64::new(0),
            held: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    pub fn sign_calls(&self) -> usize {
        self.signs.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap(), Ordering::SeqCst);
    }

    /// Make the next sign call wait for [`Self::release`].
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Resolves once a held sign call has started.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }
}

#[async_trait]
impl KeystoreBackend for CountingBackend {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    async fn generate(&self, purpose: KeyPurpose) -> Result<GeneratedKey, KeystoreError> {
        self.inner.generate(purpose).await
    }

    async fn sign(&self, handle: &KeyHandle, payload: &[u8]) -> Result<Signature, KeystoreError> {
        self.signs.fetch_add(1, Ordering::SeqCst);
        if self.held.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.sign(handle, payload).await
    }

    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }
}

pub struct Harness {
    pub vault: Vault,
    pub db: VaultDatabase,
    pub backend: Arc<CountingBackend>,
    _dir: TempDir,
}

pub async fn harness() -> Harness {
    harness_with(VaultSettings::default()).await
}

/// A file-backed vault (real connection pool) with account `vendor1`.
pub async fn harness_with(settings: VaultSettings) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = VaultDatabase::open(&dir.path().join("vault.db"))
        .await
        .unwrap();

    let software = SoftwareBackend::new(dir.path().join("keystore"), b"test master secret")
        .unwrap();
    let backend = Arc::new(CountingBackend::new(Arc::new(software)));
    let dyn_backend: Arc<dyn KeystoreBackend> = backend.clone();

    let vault = Vault::new(&db, vec![dyn_backend], settings);
    vault
        .accounts
        .create(AUTHORITY, "Vendor One")
        .await
        .unwrap();

    Harness {
        vault,
        db,
        backend,
        _dir: dir,
    }
}

impl Harness {
    /// Generate the first serial key (auto-activated) and model `router-3400`.
    pub async fn provision(&self) -> Keypair {
        let key = self.generate_key().await;
        self.vault
            .models
            .create(&owner(), AUTHORITY, MODEL, Some(&key.key_id))
            .await
            .unwrap();
        key
    }

    pub async fn generate_key(&self) -> Keypair {
        self.vault
            .registry
            .generate(&owner(), AUTHORITY, KeyPurpose::Serial)
            .await
            .unwrap()
    }

    pub async fn nonce(&self) -> String {
        self.vault.nonces.issue().await.unwrap().nonce
    }

    pub async fn log_count(&self) -> i64 {
        self.vault.audit.count().await.unwrap()
    }

    pub async fn active_serial_keys(&self) -> i64 {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM keypairs WHERE authority_id = ? AND purpose = 'serial' AND active = 1",
        )
        .bind(AUTHORITY)
        .fetch_one(self.db.pool())
        .await
        .unwrap()
    }
}

/// Check an Ed25519 signature against a stored keypair.
pub fn verify(keypair: &Keypair, payload: &[u8], signature: &Signature) {
    let pk: [u8; 32] = keypair.public_key.as_slice().try_into().unwrap();
    let key = VerifyingKey::from_bytes(&pk).unwrap();
    let sig = EdSignature::from_slice(signature.as_bytes()).unwrap();
    key.verify(payload, &sig).unwrap();
}
