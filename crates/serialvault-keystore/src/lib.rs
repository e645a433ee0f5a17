//! `SerialVault` Keystore Library
//!
//! Where signing keys live and how they sign, behind one async capability.
//!
//! ## Backends
//!
//! - **Software**: Ed25519 seeds sealed with ChaCha20-Poly1305 in per-key files,
//!   sealing key derived from the operator's master secret via HKDF-SHA256
//! - **Hardware**: keys persisted inside a TPM 2.0 module, reached through a
//!   blocking [`TpmModule`] and an explicitly initialized [`TpmSession`];
//!   [`Tpm2ToolsModule`] drives a real module through `tpm2-tools`
//!
//! Key ids are the first 8 bytes of SHA-256 over the public key, hex encoded.

pub mod backend;
pub mod error;
pub mod fingerprint;
pub mod hardware;
pub mod software;
pub mod tpm2_tools;

pub use backend::{BackendKind, GeneratedKey, KeyHandle, KeyPurpose, KeystoreBackend, Signature};
pub use error::KeystoreError;
pub use fingerprint::{constant_time_str_eq, fingerprint_of, key_id_for};
pub use hardware::{HardwareBackend, TpmCredentials, TpmKey, TpmModule, TpmSession};
pub use software::SoftwareBackend;
pub use tpm2_tools::{SystemTools, ToolRunner, Tpm2ToolsModule};
