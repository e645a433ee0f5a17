//! Software keystore: Ed25519 keys sealed in files on local storage.
//!
//! Each key is one file `<key-id>.key` holding `nonce || ciphertext`, where
//! the ciphertext is the 32-byte Ed25519 seed sealed with ChaCha20-Poly1305
//! under a key derived from the operator's master secret. The key id is bound
//! in as associated data, so renaming a file onto another id fails to unseal.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::{Signer as _, SigningKey};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use tracing::{debug, info};
use zeroize::{Zeroize, Zeroizing};

use crate::backend::{
    BackendKind, GeneratedKey, KeyHandle, KeyPurpose, KeystoreBackend, Signature, ensure_kind,
};
use crate::error::KeystoreError;
use crate::fingerprint::{constant_time_str_eq, key_id_for};

/// HKDF info string for the sealing key.
const HKDF_INFO: &[u8] = b"serialvault-keystore-seal-v1";

/// HKDF salt for domain separation (recommended by RFC 5869).
const HKDF_SALT: &[u8] = b"serialvault-keystore-hkdf-salt-v1";

const NONCE_SIZE: usize = 12;
const SEED_SIZE: usize = 32;
const KEY_FILE_EXT: &str = "key";

/// Keys held in a local directory of sealed files.
pub struct SoftwareBackend {
    dir: PathBuf,
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for SoftwareBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareBackend")
            .field("dir", &self.dir)
            .field("cipher", &"[REDACTED]")
            .finish()
    }
}

impl SoftwareBackend {
    /// Open (creating if needed) the key directory and derive the sealing key
    /// from `master_secret`.
    pub fn new(dir: impl Into<PathBuf>, master_secret: &[u8]) -> Result<Self, KeystoreError> {
        if master_secret.is_empty() {
            return Err(KeystoreError::Sealing("master secret must not be empty".to_string()));
        }
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
        }

        let mut key_bytes = derive_sealing_key(master_secret)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key_bytes));
        key_bytes.zeroize();

        info!(dir = %dir.display(), "Software keystore opened");
        Ok(Self { dir, cipher })
    }

    /// Directory the sealed key files live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Public key bytes of a stored key.
    pub fn public_key(&self, handle: &KeyHandle) -> Result<[u8; 32], KeystoreError> {
        Ok(self.load_signing_key(handle)?.verifying_key().to_bytes())
    }

    fn seal(&self, seed: &[u8; SEED_SIZE], key_id: &str) -> Result<Vec<u8>, KeystoreError> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: seed,
                    aad: key_id.as_bytes(),
                },
            )
            .map_err(|e| KeystoreError::Sealing(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn unseal(
        &self,
        blob: &[u8],
        key_id: &str,
    ) -> Result<Zeroizing<[u8; SEED_SIZE]>, KeystoreError> {
        if blob.len() <= NONCE_SIZE {
            return Err(KeystoreError::Sealing(format!("key file for {key_id} is truncated")));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(
                    Nonce::from_slice(nonce),
                    Payload {
                        msg: ciphertext,
                        aad: key_id.as_bytes(),
                    },
                )
                .map_err(|e| KeystoreError::Sealing(format!("unseal {key_id}: {e}")))?,
        );

        if plaintext.len() != SEED_SIZE {
            return Err(KeystoreError::InvalidKeyLength {
                expected: SEED_SIZE,
                actual: plaintext.len(),
            });
        }
        let mut seed = Zeroizing::new([0u8; SEED_SIZE]);
        seed.copy_from_slice(&plaintext);
        Ok(seed)
    }

    /// Resolve a handle to its file, rejecting anything that is not a bare
    /// `<key-id>.key` name inside the keystore directory.
    fn key_path(&self, handle: &KeyHandle) -> Result<PathBuf, KeystoreError> {
        ensure_kind(handle, BackendKind::Software)?;
        if handle.reference != key_file_name(&handle.key_id)
            || !handle.key_id.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(KeystoreError::InvalidHandle(format!(
                "malformed software key reference {:?}",
                handle.reference
            )));
        }
        Ok(self.dir.join(&handle.reference))
    }

    fn load_signing_key(&self, handle: &KeyHandle) -> Result<SigningKey, KeystoreError> {
        let path = self.key_path(handle)?;
        if !self.dir.is_dir() {
            return Err(KeystoreError::Unavailable(format!(
                "keystore directory {} is missing",
                self.dir.display()
            )));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(&path) {
                let mode = metadata.permissions().mode() & 0o777;
                if mode != 0o600 {
                    return Err(KeystoreError::Sealing(format!(
                        "key file {} has insecure permissions: {mode:o} (expected 600)",
                        path.display()
                    )));
                }
            }
        }

        let blob = match std::fs::read(&path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KeystoreError::KeyNotFound(handle.key_id.clone()));
            }
            Err(e) => return Err(KeystoreError::Unavailable(e.to_string())),
        };

        let seed = self.unseal(&blob, &handle.key_id)?;
        let signing_key = SigningKey::from_bytes(&seed);

        let derived = key_id_for(signing_key.verifying_key().as_bytes());
        if !constant_time_str_eq(&derived, &handle.key_id) {
            return Err(KeystoreError::Sealing(format!(
                "key file for {} holds a different key",
                handle.key_id
            )));
        }
        Ok(signing_key)
    }
}

#[async_trait]
impl KeystoreBackend for SoftwareBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    async fn generate(&self, purpose: KeyPurpose) -> Result<GeneratedKey, KeystoreError> {
        let mut seed = Zeroizing::new([0u8; SEED_SIZE]);
        OsRng.fill_bytes(&mut *seed);
        let signing_key = SigningKey::from_bytes(&seed);
        let public_key = signing_key.verifying_key().to_bytes();
        let key_id = key_id_for(&public_key);

        let blob = self.seal(&seed, &key_id)?;
        let reference = key_file_name(&key_id);
        let path = self.dir.join(&reference);
        std::fs::write(&path, &blob)?;

        // Set restrictive permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }

        info!(key_id = %key_id, purpose = %purpose, "Generated software key");
        Ok(GeneratedKey {
            handle: KeyHandle::new(key_id, BackendKind::Software, reference),
            public_key: public_key.to_vec(),
        })
    }

    async fn sign(&self, handle: &KeyHandle, payload: &[u8]) -> Result<Signature, KeystoreError> {
        let signing_key = self.load_signing_key(handle)?;
        let signature = signing_key.sign(payload);
        debug!(key_id = %handle.key_id, "Signed payload with software key");
        Ok(Signature::new(signature.to_bytes().to_vec()))
    }

    async fn is_available(&self) -> bool {
        self.dir.is_dir()
    }
}

fn key_file_name(key_id: &str) -> String {
    format!("{key_id}.{KEY_FILE_EXT}")
}

/// Derive a 32-byte sealing key from the master secret via HKDF-SHA256.
///
/// The caller is responsible for zeroizing the returned bytes.
fn derive_sealing_key(master_secret: &[u8]) -> Result<[u8; 32], KeystoreError> {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), master_secret);
    let mut key = [0u8; 32];
    hk.expand(HKDF_INFO, &mut key)
        .map_err(|e| KeystoreError::Sealing(e.to_string()))?;
    Ok(key)
}
