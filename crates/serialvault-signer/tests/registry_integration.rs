#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Key registry and nonce ledger behaviour under concurrency, plus the
//! hardware keystore wired through the vault.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ed25519_dalek::{Signer as _, SigningKey};
use rand::rngs::OsRng;

use serialvault_keystore::{
    BackendKind, HardwareBackend, KeyPurpose, KeystoreBackend, KeystoreError, SoftwareBackend,
    TpmCredentials, TpmKey, TpmModule, TpmSession,
};
use serialvault_signer::{
    AuthenticatedUser, ErrorKind, NonceError, SignRequest, SubstoreUpdate, Vault, VaultDatabase,
    VaultError, VaultSettings,
};

use common::{AUTHORITY, MODEL, harness, owner, verify};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_consumers_race_for_one_nonce() {
    let h = harness().await;
    let nonce = h.nonce().await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let nonces = h.vault.nonces.clone();
        let nonce = nonce.clone();
        tasks.push(tokio::spawn(async move { nonces.consume(&nonce).await }));
    }

    let mut won = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => won += 1,
            Err(e) => assert!(matches!(e, VaultError::Nonce(NonceError::AlreadyUsed))),
        }
    }
    assert_eq!(won, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn activation_swap_never_shows_two_or_zero_active() {
    let h = harness().await;
    let a = h.generate_key().await;
    let b = h.generate_key().await;
    assert!(a.is_active());
    assert!(!b.is_active());

    let stop = Arc::new(AtomicBool::new(false));
    let reader = {
        let stop = Arc::clone(&stop);
        let db = h.db.clone();
        tokio::spawn(async move {
            let mut reads = 0_u32;
            while !stop.load(Ordering::SeqCst) {
                let active: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM keypairs WHERE authority_id = ? AND purpose = 'serial' AND active = 1",
                )
                .bind(AUTHORITY)
                .fetch_one(db.pool())
                .await
                .unwrap();
                assert_eq!(active, 1);
                reads += 1;
                tokio::task::yield_now().await;
            }
            reads
        })
    };

    for i in 0..20 {
        let target = if i % 2 == 0 { &b.key_id } else { &a.key_id };
        let activated = h
            .vault
            .registry
            .activate(&owner(), AUTHORITY, target)
            .await
            .unwrap();
        assert!(activated.is_active());
    }
    stop.store(true, Ordering::SeqCst);

    assert!(reader.await.unwrap() > 0);
    assert_eq!(h.active_serial_keys().await, 1);
    let active = h
        .vault
        .registry
        .active_keypair(AUTHORITY, KeyPurpose::Serial)
        .await
        .unwrap();
    assert_eq!(active.key_id, a.key_id);
}

#[tokio::test]
async fn only_first_key_of_a_purpose_is_auto_activated() {
    let h = harness().await;
    let first = h.generate_key().await;
    let second = h.generate_key().await;
    let system_user = h
        .vault
        .registry
        .generate(&owner(), AUTHORITY, KeyPurpose::SystemUser)
        .await
        .unwrap();

    assert!(first.is_active());
    assert!(!second.is_active());
    assert!(system_user.is_active());
    assert_eq!(h.active_serial_keys().await, 1);

    let keys = h.vault.registry.list(&owner(), AUTHORITY).await.unwrap();
    assert_eq!(keys.len(), 3);
}

#[tokio::test]
async fn disabled_key_cannot_come_back() {
    let h = harness().await;
    let a = h.generate_key().await;
    let b = h.generate_key().await;

    h.vault
        .registry
        .disable(&owner(), AUTHORITY, &a.key_id)
        .await
        .unwrap();
    assert_eq!(h.active_serial_keys().await, 0);

    let err = h
        .vault
        .registry
        .activate(&owner(), AUTHORITY, &a.key_id)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::KeyDisabled(_)));
    assert_eq!(err.kind(), ErrorKind::Key);

    let err = h
        .vault
        .registry
        .activate(&owner(), AUTHORITY, "0000000000000000")
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::KeyNotFound(_)));

    h.vault
        .registry
        .activate(&owner(), AUTHORITY, &b.key_id)
        .await
        .unwrap();
    assert_eq!(h.active_serial_keys().await, 1);
}

#[tokio::test]
async fn active_key_for_follows_activation() {
    let h = harness().await;
    let a = h.generate_key().await;

    let handle = h
        .vault
        .registry
        .active_key_for(AUTHORITY, KeyPurpose::Serial)
        .await
        .unwrap();
    assert_eq!(handle.key_id, a.key_id);
    assert_eq!(handle.backend, BackendKind::Software);

    h.vault
        .registry
        .disable(&owner(), AUTHORITY, &a.key_id)
        .await
        .unwrap();
    let err = h
        .vault
        .registry
        .active_key_for(AUTHORITY, KeyPurpose::Serial)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::NoActiveKey { .. }));
    assert_eq!(err.kind(), ErrorKind::Key);
}

#[tokio::test]
async fn substore_user_cannot_manage_the_account() {
    let h = harness().await;
    h.provision().await;
    let substore = h
        .vault
        .substores
        .create(&owner(), AUTHORITY, MODEL, "acme-store")
        .await
        .unwrap();
    let reseller = AuthenticatedUser::substore("bob", AUTHORITY, "acme-store", substore.model_id);

    let err = h
        .vault
        .registry
        .generate(&reseller, AUTHORITY, KeyPurpose::Serial)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    let err = h
        .vault
        .substores
        .update(
            &reseller,
            AUTHORITY,
            substore.id,
            SubstoreUpdate {
                enabled: Some(false),
                ..SubstoreUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    let err = h
        .vault
        .audit
        .list_by_serial(&reseller, AUTHORITY, "A1")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    let visible = h.vault.substores.list(&reseller, AUTHORITY).await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].store_id, "acme-store");
}

/// In-process TPM: Ed25519 keys keyed by persistent handle.
#[derive(Default)]
struct FakeTpm {
    keys: Mutex<HashMap<u32, SigningKey>>,
}

impl TpmModule for FakeTpm {
    fn initialize(&self, _credentials: &TpmCredentials) -> Result<(), KeystoreError> {
        Ok(())
    }

    fn create_key(
        &self,
        _credentials: &TpmCredentials,
        _purpose: KeyPurpose,
    ) -> Result<TpmKey, KeystoreError> {
        let mut keys = self.keys.lock().unwrap();
        let handle = 0x8101_0000 + u32::try_from(keys.len()).unwrap();
        let key = SigningKey::generate(&mut OsRng);
        let public_key = key.verifying_key().to_bytes().to_vec();
        keys.insert(handle, key);
        Ok(TpmKey {
            persistent_handle: handle,
            public_key,
        })
    }

    fn sign(
        &self,
        _credentials: &TpmCredentials,
        persistent_handle: u32,
        payload: &[u8],
    ) -> Result<Vec<u8>, KeystoreError> {
        let keys = self.keys.lock().unwrap();
        let key = keys
            .get(&persistent_handle)
            .ok_or_else(|| KeystoreError::KeyNotFound(format!("0x{persistent_handle:08x}")))?;
        Ok(key.sign(payload).to_bytes().to_vec())
    }

    fn is_reachable(&self, _credentials: &TpmCredentials) -> bool {
        true
    }
}

#[tokio::test]
async fn hardware_keys_sign_alongside_older_software_keys() {
    let dir = tempfile::tempdir().unwrap();
    let db = VaultDatabase::open(&dir.path().join("vault.db"))
        .await
        .unwrap();
    let software = SoftwareBackend::new(dir.path().join("keystore"), b"test master secret");
    let software: Arc<dyn KeystoreBackend> = Arc::new(software.unwrap());

    // Start on software keys.
    let vault = Vault::new(&db, vec![Arc::clone(&software)], VaultSettings::default());
    vault
        .accounts
        .create(AUTHORITY, "Vendor One")
        .await
        .unwrap();
    let soft_key = vault
        .registry
        .generate(&owner(), AUTHORITY, KeyPurpose::Serial)
        .await
        .unwrap();
    vault
        .models
        .create(&owner(), AUTHORITY, MODEL, Some(&soft_key.key_id))
        .await
        .unwrap();

    // Move to the TPM, keeping the software backend reachable.
    let session = Arc::new(TpmSession::new(
        Arc::new(FakeTpm::default()),
        TpmCredentials::new("swtpm:port=2321", "owner"),
    ));
    session.initialize().unwrap();
    let hardware: Arc<dyn KeystoreBackend> = Arc::new(HardwareBackend::new(session).unwrap());
    let vault = Vault::new(&db, vec![hardware, software], VaultSettings::default());
    assert!(vault.registry.is_available(BackendKind::Hardware).await);

    let nonce = vault.nonces.issue().await.unwrap().nonce;
    let signed = vault
        .engine
        .sign(&owner(), AUTHORITY, SignRequest::new(MODEL, "A1", nonce))
        .await
        .unwrap();
    assert_eq!(signed.key_id, soft_key.key_id);
    verify(&soft_key, signed.payload.as_bytes(), &signed.signature);

    let tpm_key = vault
        .registry
        .generate(&owner(), AUTHORITY, KeyPurpose::Serial)
        .await
        .unwrap();
    assert_eq!(tpm_key.backend, "hardware");
    assert!(!tpm_key.is_active());
    vault
        .registry
        .activate(&owner(), AUTHORITY, &tpm_key.key_id)
        .await
        .unwrap();

    let nonce = vault.nonces.issue().await.unwrap().nonce;
    let signed = vault
        .engine
        .sign(&owner(), AUTHORITY, SignRequest::new(MODEL, "A2", nonce))
        .await
        .unwrap();
    assert_eq!(signed.key_id, tpm_key.key_id);
    verify(&tpm_key, signed.payload.as_bytes(), &signed.signature);
}
